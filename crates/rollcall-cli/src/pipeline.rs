//! Interactive capture loop as an explicit state machine.
//!
//! ```text
//! AwaitingFrame -> Detecting -> Classifying -> Rendering -> AwaitingFrame
//!       |                            |
//!       +--> Finished(Quit/Camera)   +--> Finished(Logged)
//! ```
//!
//! The pipeline owns its frame source; every terminal outcome returns from
//! [`FramePipeline::run`], which drops the source and releases the camera.

use crate::attendance::AttendanceLog;
use crate::overlay::{Annotation, Overlay};
use chrono::Local;
use rollcall_core::{
    AttendanceRecord, EncodedFace, EncoderError, EuclideanMatcher, FaceEncoder, Gallery,
    MatchError, Matcher, SessionTracker, DEFAULT_TOLERANCE,
};
use rollcall_hw::{frame, Camera, CameraError, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Frames are shrunk by this factor before encoding unless configured.
pub const DEFAULT_DETECTION_SCALE: u32 = 4;

/// Anything that yields camera frames, blocking until one is ready.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub tolerance: f32,
    /// Integer downsampling factor applied before encoding; 1 disables it.
    pub detection_scale: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            detection_scale: DEFAULT_DETECTION_SCALE,
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// A known face was seen for the first time this session and recorded.
    Logged(AttendanceRecord),
    QuitRequested,
    CameraFailed(CameraError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face encoder failed: {0}")]
    Encoder(#[from] EncoderError),
    #[error("gallery cannot be matched: {0}")]
    Match(#[from] MatchError),
}

enum State {
    AwaitingFrame,
    Detecting(Frame),
    Classifying { frame: Frame, faces: Vec<EncodedFace> },
    Rendering { frame: Frame, annotations: Vec<Annotation> },
    Finished(Outcome),
}

pub struct FramePipeline<S, E, L, O> {
    source: S,
    encoder: E,
    log: L,
    overlay: O,
    gallery: Gallery,
    matcher: EuclideanMatcher,
    session: SessionTracker,
    quit: Arc<AtomicBool>,
    options: PipelineOptions,
}

impl<S, E, L, O> FramePipeline<S, E, L, O>
where
    S: FrameSource,
    E: FaceEncoder,
    L: AttendanceLog,
    O: Overlay,
{
    pub fn new(
        source: S,
        encoder: E,
        log: L,
        overlay: O,
        gallery: Gallery,
        quit: Arc<AtomicBool>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            encoder,
            log,
            overlay,
            gallery,
            matcher: EuclideanMatcher,
            session: SessionTracker::new(),
            quit,
            options,
        }
    }

    /// Drive the loop until a terminal outcome or a fatal error.
    pub fn run(mut self) -> Result<Outcome, PipelineError> {
        tracing::info!(
            known = self.gallery.len(),
            tolerance = self.options.tolerance,
            scale = self.options.detection_scale,
            "capture loop started"
        );

        let mut state = State::AwaitingFrame;
        loop {
            state = match state {
                State::Finished(outcome) => {
                    tracing::info!(
                        outcome = ?outcome,
                        logged = ?self.session.logged_labels(),
                        "capture loop finished"
                    );
                    return Ok(outcome);
                }
                other => self.step(other)?,
            };
        }
    }

    fn step(&mut self, state: State) -> Result<State, PipelineError> {
        Ok(match state {
            State::AwaitingFrame => {
                if self.quit.load(Ordering::SeqCst) {
                    return Ok(State::Finished(Outcome::QuitRequested));
                }
                match self.source.next_frame() {
                    Ok(frame) => State::Detecting(frame),
                    Err(e) => {
                        tracing::error!(error = %e, "frame capture failed");
                        State::Finished(Outcome::CameraFailed(e))
                    }
                }
            }
            State::Detecting(frame) => {
                let scale = self.options.detection_scale.max(1);
                let small = frame::downsample(&frame.image, scale);
                let faces = self
                    .encoder
                    .encode(&small)?
                    .into_iter()
                    .map(|face| EncodedFace {
                        region: face.region.scaled(scale as f32),
                        signature: face.signature,
                    })
                    .collect();
                State::Classifying { frame, faces }
            }
            State::Classifying { frame, faces } => self.classify(frame, faces)?,
            State::Rendering { frame, annotations } => {
                if let Err(e) = self.overlay.render(&frame, &annotations) {
                    tracing::warn!(error = %e, "overlay render failed");
                }
                State::AwaitingFrame
            }
            finished @ State::Finished(_) => finished,
        })
    }

    fn classify(&mut self, frame: Frame, faces: Vec<EncodedFace>) -> Result<State, PipelineError> {
        let mut annotations = Vec::with_capacity(faces.len());

        for face in faces {
            let result = self
                .matcher
                .classify(&face.signature, &self.gallery, self.options.tolerance)?;

            if let Some(label) = result.matched_label.as_deref() {
                if self.session.should_log(label) {
                    let log = &mut self.log;
                    let appended = self
                        .session
                        .record_once(label, |label| log.append(label, Local::now().naive_local()));
                    match appended {
                        Ok(Some(record)) => {
                            tracing::info!(
                                label = %record.label,
                                date = %record.date,
                                time = %record.time,
                                "attendance logged"
                            );
                            return Ok(State::Finished(Outcome::Logged(record)));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(label, error = %e, "attendance write failed");
                            return Ok(State::AwaitingFrame);
                        }
                    }
                }
            }

            annotations.push(Annotation {
                label: result.display_label().to_string(),
                confidence: result.confidence,
                region: face.region,
            });
        }

        Ok(State::Rendering { frame, annotations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceError;
    use crate::overlay::OverlayError;
    use chrono::NaiveDateTime;
    use image::{Rgb, RgbImage};
    use rollcall_core::{FaceRegion, GalleryEntry, Signature};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn frame(colour: Rgb<u8>) -> Frame {
        Frame::new(RgbImage::from_pixel(64, 64, colour))
    }

    #[derive(Default)]
    struct Recorder {
        pulled: Cell<usize>,
        released: Cell<bool>,
        encoded_sizes: RefCell<Vec<(u32, u32)>>,
        appended: RefCell<Vec<String>>,
        rendered: RefCell<Vec<Vec<Annotation>>>,
    }

    struct FakeSource {
        frames: VecDeque<Frame>,
        recorder: Rc<Recorder>,
        quit_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            let pulled = self.recorder.pulled.get() + 1;
            self.recorder.pulled.set(pulled);
            if let Some((limit, quit)) = &self.quit_after {
                if pulled >= *limit {
                    quit.store(true, Ordering::SeqCst);
                }
            }
            self.frames
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("stream ended".into()))
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.recorder.released.set(true);
        }
    }

    /// One face per non-black image; the signature is the mean colour.
    struct ColourEncoder {
        recorder: Rc<Recorder>,
    }

    impl FaceEncoder for ColourEncoder {
        fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
            self.recorder.encoded_sizes.borrow_mut().push(image.dimensions());
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(vec![EncodedFace {
                region: FaceRegion {
                    x: 2.0,
                    y: 3.0,
                    width: 5.0,
                    height: 6.0,
                    confidence: 0.99,
                    landmarks: None,
                },
                signature: Signature::new(p.0.iter().map(|&c| c as f32 / 255.0).collect()),
            }])
        }
    }

    struct FakeLog {
        recorder: Rc<Recorder>,
        failures_left: usize,
    }

    impl AttendanceLog for FakeLog {
        fn append(&mut self, label: &str, timestamp: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(AttendanceError::Io {
                    path: "attendance.csv".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.recorder.appended.borrow_mut().push(label.to_string());
            Ok(AttendanceRecord::new(label, timestamp))
        }
    }

    struct RecordingOverlay {
        recorder: Rc<Recorder>,
    }

    impl Overlay for RecordingOverlay {
        fn render(&mut self, _frame: &Frame, annotations: &[Annotation]) -> Result<(), OverlayError> {
            self.recorder.rendered.borrow_mut().push(annotations.to_vec());
            Ok(())
        }
    }

    fn gallery() -> Gallery {
        Gallery::from_entries(vec![
            GalleryEntry { label: "alice".into(), signature: Signature::new(vec![1.0, 0.0, 0.0]) },
            GalleryEntry { label: "bob".into(), signature: Signature::new(vec![0.0, 0.0, 1.0]) },
        ])
        .unwrap()
    }

    type TestPipeline = FramePipeline<FakeSource, ColourEncoder, FakeLog, RecordingOverlay>;

    fn pipeline(frames: Vec<Frame>, gallery: Gallery, failures: usize) -> (TestPipeline, Rc<Recorder>, Arc<AtomicBool>) {
        let recorder = Rc::new(Recorder::default());
        let quit = Arc::new(AtomicBool::new(false));
        let pipeline = FramePipeline::new(
            FakeSource { frames: frames.into(), recorder: recorder.clone(), quit_after: None },
            ColourEncoder { recorder: recorder.clone() },
            FakeLog { recorder: recorder.clone(), failures_left: failures },
            RecordingOverlay { recorder: recorder.clone() },
            gallery,
            quit.clone(),
            PipelineOptions::default(),
        );
        (pipeline, recorder, quit)
    }

    #[test]
    fn test_known_face_logged_once_on_first_frame() {
        let (pipeline, recorder, _) = pipeline(vec![frame(RED), frame(RED)], gallery(), 0);

        let outcome = pipeline.run().unwrap();
        match outcome {
            Outcome::Logged(record) => assert_eq!(record.label, "alice"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*recorder.appended.borrow(), vec!["alice"]);
        assert_eq!(recorder.pulled.get(), 1, "frame 2 must not be pulled");
        assert!(recorder.released.get());
    }

    #[test]
    fn test_unknown_faces_rendered_until_camera_fails() {
        let (pipeline, recorder, _) = pipeline(vec![frame(GREEN), frame(BLACK)], gallery(), 0);

        let outcome = pipeline.run().unwrap();
        assert!(matches!(outcome, Outcome::CameraFailed(CameraError::CaptureFailed(_))));
        assert!(recorder.appended.borrow().is_empty());
        assert!(recorder.released.get());

        let rendered = recorder.rendered.borrow();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].len(), 1);
        assert_eq!(rendered[0][0].label, "Unknown");
        assert!(rendered[1].is_empty());
    }

    #[test]
    fn test_regions_scaled_back_to_full_resolution() {
        let (pipeline, recorder, _) = pipeline(vec![frame(GREEN)], gallery(), 0);
        pipeline.run().unwrap();

        assert_eq!(*recorder.encoded_sizes.borrow(), vec![(16, 16)]);
        let region = &recorder.rendered.borrow()[0][0].region;
        assert_eq!((region.x, region.y, region.width, region.height), (8.0, 12.0, 20.0, 24.0));
    }

    #[test]
    fn test_quit_before_first_frame() {
        let (pipeline, recorder, quit) = pipeline(vec![frame(RED)], gallery(), 0);
        quit.store(true, Ordering::SeqCst);

        assert!(matches!(pipeline.run().unwrap(), Outcome::QuitRequested));
        assert_eq!(recorder.pulled.get(), 0);
        assert!(recorder.released.get());
    }

    #[test]
    fn test_quit_observed_on_next_cycle() {
        let recorder = Rc::new(Recorder::default());
        let quit = Arc::new(AtomicBool::new(false));
        let source = FakeSource {
            frames: vec![frame(GREEN), frame(GREEN), frame(RED)].into(),
            recorder: recorder.clone(),
            quit_after: Some((2, quit.clone())),
        };
        let pipeline = FramePipeline::new(
            source,
            ColourEncoder { recorder: recorder.clone() },
            FakeLog { recorder: recorder.clone(), failures_left: 0 },
            RecordingOverlay { recorder: recorder.clone() },
            gallery(),
            quit,
            PipelineOptions::default(),
        );

        assert!(matches!(pipeline.run().unwrap(), Outcome::QuitRequested));
        assert_eq!(recorder.pulled.get(), 2);
        assert_eq!(recorder.rendered.borrow().len(), 2);
    }

    #[test]
    fn test_failed_append_retried_on_later_frame() {
        let (pipeline, recorder, _) = pipeline(vec![frame(RED), frame(RED)], gallery(), 1);

        let outcome = pipeline.run().unwrap();
        assert!(matches!(outcome, Outcome::Logged(ref r) if r.label == "alice"));
        assert_eq!(recorder.pulled.get(), 2);
        assert_eq!(*recorder.appended.borrow(), vec!["alice"]);
        // The failed iteration is abandoned without rendering.
        assert!(recorder.rendered.borrow().is_empty());
    }

    #[test]
    fn test_empty_gallery_never_logs() {
        let (pipeline, recorder, _) = pipeline(vec![frame(RED)], Gallery::empty(), 0);

        assert!(matches!(pipeline.run().unwrap(), Outcome::CameraFailed(_)));
        assert!(recorder.appended.borrow().is_empty());
        assert_eq!(recorder.rendered.borrow()[0][0].label, "Unknown");
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let gallery = Gallery::from_entries(vec![GalleryEntry {
            label: "alice".into(),
            signature: Signature::new(vec![1.0, 0.0]),
        }])
        .unwrap();
        let (pipeline, recorder, _) = pipeline(vec![frame(RED)], gallery, 0);

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Match(MatchError::DimensionMismatch { gallery: 2, query: 3 })));
        assert!(recorder.released.get());
    }

    struct FailingEncoder {
        recorder: Rc<Recorder>,
    }

    impl FaceEncoder for FailingEncoder {
        fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
            self.recorder.encoded_sizes.borrow_mut().push(image.dimensions());
            Err(rollcall_core::detector::DetectorError::InferenceFailed("session poisoned".into()).into())
        }
    }

    #[test]
    fn test_encoder_failure_is_fatal() {
        let recorder = Rc::new(Recorder::default());
        let pipeline = FramePipeline::new(
            FakeSource {
                frames: vec![frame(RED), frame(RED)].into(),
                recorder: recorder.clone(),
                quit_after: None,
            },
            FailingEncoder { recorder: recorder.clone() },
            FakeLog { recorder: recorder.clone(), failures_left: 0 },
            RecordingOverlay { recorder: recorder.clone() },
            gallery(),
            Arc::new(AtomicBool::new(false)),
            PipelineOptions::default(),
        );

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Encoder(EncoderError::Detector(_))));
        assert_eq!(recorder.pulled.get(), 1);
        assert_eq!(recorder.encoded_sizes.borrow().len(), 1);
        assert!(recorder.rendered.borrow().is_empty());
        assert!(recorder.appended.borrow().is_empty());
        assert!(recorder.released.get());
    }
}
