use image::RgbImage;
use rollcall_core::{EncodedFace, EncoderError, FaceEncoder, Gallery, GalleryError};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Encode {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<EncodedFace>, EngineError>>,
    },
    LoadGallery {
        dir: PathBuf,
        reply: oneshot::Sender<Result<Gallery, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect and encode every face in `image`.
    pub async fn encode(&self, image: RgbImage) -> Result<Vec<EncodedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Build a complete gallery from `dir` without touching the published one.
    pub async fn load_gallery(&self, dir: PathBuf) -> Result<Gallery, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::LoadGallery {
                dir,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder needs exclusive access for inference, so it is owned by this
/// thread and every request is served in arrival order. The thread exits
/// once all handles are dropped.
pub fn spawn_engine<E>(mut encoder: E) -> std::io::Result<EngineHandle>
where
    E: FaceEncoder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { image, reply } => {
                        let result = encoder.encode(&image).map_err(EngineError::from);
                        if let Ok(faces) = &result {
                            tracing::debug!(
                                width = image.width(),
                                height = image.height(),
                                faces = faces.len(),
                                "image encoded"
                            );
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::LoadGallery { dir, reply } => {
                        let result = Gallery::load(&dir, &mut encoder).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
