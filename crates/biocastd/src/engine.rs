use std::panic::{self, AssertUnwindSafe};

use biocast_core::{decode_image, Catalog, Pipeline, PipelineError, PresentedMatch};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

/// Result of matching one upload.
#[derive(Debug)]
pub enum MatchOutcome {
    NoFace,
    Matches(Vec<PresentedMatch>),
}

/// Message sent from HTTP handlers to the engine thread.
struct MatchRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<MatchOutcome, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<MatchRequest>,
}

impl EngineHandle {
    /// Run the full pipeline on an uploaded image and resolve display photos.
    pub async fn find_matches(&self, image: Vec<u8>) -> Result<MatchOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MatchRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the pipeline and handles one request at a time, in
/// arrival order, each to completion.
pub fn spawn_engine(mut pipeline: Pipeline, catalog: Catalog) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<MatchRequest>(4);

    std::thread::Builder::new()
        .name("biocast-engine".into())
        .spawn(move || {
            tracing::info!(catalog_size = pipeline.catalog_size(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                // A panic fails this request only; the thread keeps serving.
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_match(&mut pipeline, &catalog, &req.image)
                }))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(panic = %message, "match: pipeline panicked");
                    Err(EngineError::Panicked(message))
                });
                if req.reply.send(result).is_err() {
                    tracing::debug!("requester went away before the reply");
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Decode, detect, embed, search, then resolve a display photo per match.
fn run_match(pipeline: &mut Pipeline, catalog: &Catalog, bytes: &[u8]) -> Result<MatchOutcome, EngineError> {
    let image = decode_image(bytes)?;
    tracing::debug!(width = image.width(), height = image.height(), "upload decoded");

    let Some(matches) = pipeline.find_best_match(&image)? else {
        tracing::info!("match: no face detected");
        return Ok(MatchOutcome::NoFace);
    };

    let presented = catalog.present(&matches);
    tracing::info!(
        top = presented.first().map(|m| m.label.as_str()),
        distance = presented.first().map(|m| m.distance),
        count = presented.len(),
        "match: results ready"
    );
    Ok(MatchOutcome::Matches(presented))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
