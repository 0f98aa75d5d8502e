use crate::events::{Notice, Presentation, ViewerEvent};
use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Headless presenter: records every frame and notice the manager sends.
///
/// Stands in for the windowed renderer; it receives exactly what a renderer
/// would (both buffers plus the transition) and logs it.
pub async fn run(
    mut from_manager: Receiver<ViewerEvent>,
    monitor: Option<usize>,
    cancel: CancellationToken,
) -> Result<()> {
    match monitor {
        Some(index) => info!(monitor = index, "presenting on requested monitor"),
        None => info!("presenting on primary monitor"),
    }

    let mut presented = 0u64;
    loop {
        select! {
            _ = cancel.cancelled() => break,
            event = from_manager.recv() => match event {
                Some(ViewerEvent::Present(presentation)) => {
                    presented += 1;
                    log_presentation(&presentation);
                }
                Some(ViewerEvent::Notice(notice)) => log_notice(&notice),
                None => break,
            }
        }
    }
    info!(presented, "viewer exiting");
    Ok(())
}

fn log_presentation(p: &Presentation) {
    let transition = p.transition.map_or("cut", |kind| kind.as_str());
    info!(
        path = %p.next.path.display(),
        width = p.next.width,
        height = p.next.height,
        from = ?p.previous.as_ref().map(|prev| prev.path.display().to_string()),
        transition,
        duration = ?p.transition_duration,
        "frame presented"
    );
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::Playing => info!("status: playing"),
        Notice::Paused => info!("status: paused"),
        Notice::Empty => info!("status: no images"),
        Notice::Resumed => info!("status: images available"),
        Notice::Showing { index, total, path } => {
            info!("status: {}/{} {}", index + 1, total, path.display());
        }
        Notice::DecodeFailed { path } => warn!("status: cannot display {}", path.display()),
        Notice::Stopped(reason) => warn!("status: stopped ({reason})"),
    }
}
