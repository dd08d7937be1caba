use teloxide::prelude::*;

use pyhost_core::stats::ServerStats;

use crate::{router::AppState, send_html};

pub(super) async fn show(bot: &Bot, chat_id: ChatId, state: &AppState) -> ResponseResult<()> {
    let running = state.supervisor.running_count().await;
    let stats = ServerStats::collect(&state.cfg.upload_dir, running).await;
    send_html(bot, chat_id, stats.to_html()).await;
    Ok(())
}
