//! Manager tests, organized by concern. Collaborators come from
//! [`super::test_helpers`]; nothing here touches the network.

mod pipeline;

use std::time::Duration;

use tokio::sync::broadcast;

use super::UploadManager;
use crate::types::Event;

/// Receive events until a terminal one arrives
pub(crate) async fn wait_for_terminal(rx: &mut broadcast::Receiver<Event>) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("event channel closed");
        if matches!(
            event,
            Event::JobCompleted { .. } | Event::JobFailed { .. } | Event::JobCanceled { .. }
        ) {
            return event;
        }
    }
}

/// Wait until the user's admission slot has been released.
///
/// Terminal events fire from inside the job task, a moment before the slot
/// guard drops, so observers have to poll the registry briefly.
pub(crate) async fn wait_for_release(manager: &UploadManager, user_id: &str) {
    for _ in 0..200 {
        if manager.status(user_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("admission slot for {user_id} was not released");
}
