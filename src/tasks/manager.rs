use crate::cache::JobId;
use crate::config::Configuration;
use crate::controller::{Effect, PlaybackController};
use crate::decode::Decode;
use crate::error::DecodeFailure;
use crate::events::{DecodedImage, FolderChanged, PlaybackCommand, SurfaceSize, ViewerEvent};
use crate::reconcile::Reconciler;
use crate::scan::ImageIdentity;
use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::future;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type DecodeOutcome = (JobId, ImageIdentity, Result<DecodedImage, DecodeFailure>);

/// Owns the [`PlaybackController`] and carries out the effects it requests.
///
/// All playlist, cache and playback-state mutation happens on this task.
/// Decodes run on the blocking pool and re-enter the loop as completions;
/// the advance timer is a single deadline re-armed by the controller.
pub async fn run<D: Decode>(
    cfg: Configuration,
    decoder: Arc<D>,
    mut folder_rx: Receiver<FolderChanged>,
    mut command_rx: Receiver<PlaybackCommand>,
    to_viewer: Sender<ViewerEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = match cfg.shuffle_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let reconciler = Reconciler::new(cfg.shuffle);
    let playlist = reconciler.build_playlist(&cfg.folders, &mut rng);
    let mut controller =
        PlaybackController::new(cfg.controller_settings(), playlist, reconciler, rng);

    let mut decodes: JoinSet<DecodeOutcome> = JoinSet::new();
    let mut deadline: Option<Instant> = None;

    let effects = controller.start();
    let mut viewer_open = apply(effects, &decoder, &mut decodes, &mut deadline, &to_viewer).await;

    while viewer_open {
        let timer = deadline;
        let effects = select! {
            _ = cancel.cancelled() => break,

            Some(FolderChanged(folder)) = folder_rx.recv() => {
                debug!(folder = %folder.display(), "folder change settled");
                controller.on_folder_changed(&folder)
            }

            Some(command) = command_rx.recv() => {
                debug!(?command, "playback command");
                controller.handle(command)
            }

            Some(joined) = decodes.join_next() => match joined {
                Ok((job, identity, result)) => controller.on_decode_complete(job, identity, result),
                Err(err) => {
                    warn!("decode task failed to join: {err}");
                    Vec::new()
                }
            },

            _ = async {
                match timer {
                    Some(at) => sleep_until(at).await,
                    None => future::pending::<()>().await,
                }
            } => {
                deadline = None;
                controller.on_timer()
            }
        };
        viewer_open = apply(effects, &decoder, &mut decodes, &mut deadline, &to_viewer).await;
    }

    decodes.abort_all();
    controller.shutdown();
    info!(state = ?controller.state(), "manager exiting");
    Ok(())
}

/// Carry out `effects` in order. Returns `false` once the viewer has gone away.
async fn apply<D: Decode>(
    effects: Vec<Effect>,
    decoder: &Arc<D>,
    decodes: &mut JoinSet<DecodeOutcome>,
    deadline: &mut Option<Instant>,
    to_viewer: &Sender<ViewerEvent>,
) -> bool {
    for effect in effects {
        let event = match effect {
            Effect::Decode { job, surface } => {
                spawn_decode(decodes, Arc::clone(decoder), job.id, job.identity, surface);
                continue;
            }
            Effect::ArmTimer(after) => {
                *deadline = Some(Instant::now() + after);
                continue;
            }
            Effect::DisarmTimer => {
                *deadline = None;
                continue;
            }
            Effect::Present(presentation) => ViewerEvent::Present(presentation),
            Effect::Notify(notice) => ViewerEvent::Notice(notice),
        };
        if to_viewer.send(event).await.is_err() {
            warn!("viewer channel closed");
            return false;
        }
    }
    true
}

fn spawn_decode<D: Decode>(
    decodes: &mut JoinSet<DecodeOutcome>,
    decoder: Arc<D>,
    job: JobId,
    identity: ImageIdentity,
    surface: SurfaceSize,
) {
    decodes.spawn(async move {
        let path = identity.path().to_path_buf();
        let blocking_path = path.clone();
        let result = tokio::task::spawn_blocking(move || decoder.decode(&blocking_path, surface))
            .await
            .unwrap_or_else(|err| Err(DecodeFailure::new(path, format!("decoder panicked: {err}"))));
        (job, identity, result)
    });
}
