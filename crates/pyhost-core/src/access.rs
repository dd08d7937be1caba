use std::sync::Arc;

use crate::{domain::UserId, store::AllowedUsers};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
    Denied,
}

/// Authorization decisions: one super admin plus a persisted allow-list.
#[derive(Clone, Debug)]
pub struct AccessControl {
    admin: Option<UserId>,
    users: Arc<AllowedUsers>,
}

impl AccessControl {
    pub fn new(admin: Option<UserId>, users: Arc<AllowedUsers>) -> Self {
        Self { admin, users }
    }

    pub fn users(&self) -> &AllowedUsers {
        &self.users
    }

    pub fn admin(&self) -> Option<UserId> {
        self.admin
    }

    pub fn role(&self, user: UserId) -> Role {
        if self.is_admin(user) {
            Role::Admin
        } else if self.users.contains(user) {
            Role::Member
        } else {
            Role::Denied
        }
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin == Some(user)
    }

    pub fn is_allowed(&self, user: UserId) -> bool {
        self.role(user) != Role::Denied
    }

    pub fn can_manage(&self, user: UserId, owner: Option<UserId>) -> bool {
        self.is_admin(user) || owner == Some(user)
    }

    /// Whether `user` may (over)write an uploaded file.
    ///
    /// An existing file owned by somebody else is off limits for non-admins.
    pub fn can_claim_file(&self, user: UserId, owner: Option<UserId>, exists: bool) -> bool {
        match owner {
            Some(owner) if exists && owner != user => self.is_admin(user),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(dir: &tempfile::TempDir) -> AccessControl {
        let users = Arc::new(AllowedUsers::new(dir.path().join("users.json")));
        users.add(UserId(2)).unwrap();
        AccessControl::new(Some(UserId(1)), users)
    }

    #[test]
    fn roles() {
        let dir = tempfile::tempdir().unwrap();
        let acl = access(&dir);
        assert_eq!(acl.role(UserId(1)), Role::Admin);
        assert_eq!(acl.role(UserId(2)), Role::Member);
        assert_eq!(acl.role(UserId(3)), Role::Denied);
        assert!(acl.is_allowed(UserId(2)));
        assert!(!acl.is_allowed(UserId(3)));
    }

    #[test]
    fn no_admin_configured() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(AllowedUsers::new(dir.path().join("users.json")));
        let acl = AccessControl::new(None, users);
        assert!(!acl.is_admin(UserId(0)));
        assert!(!acl.is_allowed(UserId(0)));
    }

    #[test]
    fn manage_and_claim_rules() {
        let dir = tempfile::tempdir().unwrap();
        let acl = access(&dir);

        assert!(acl.can_manage(UserId(2), Some(UserId(2))));
        assert!(!acl.can_manage(UserId(2), Some(UserId(9))));
        assert!(acl.can_manage(UserId(1), Some(UserId(9))));
        assert!(!acl.can_manage(UserId(2), None));

        assert!(acl.can_claim_file(UserId(2), None, true));
        assert!(acl.can_claim_file(UserId(2), Some(UserId(9)), false));
        assert!(!acl.can_claim_file(UserId(2), Some(UserId(9)), true));
        assert!(acl.can_claim_file(UserId(1), Some(UserId(9)), true));
        assert!(acl.can_claim_file(UserId(2), Some(UserId(2)), true));
    }
}
