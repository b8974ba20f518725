//! Runs the four stages in order and keeps their outputs.

use crate::dog::DifferenceOfGaussians;
use crate::extrema::Candidates;
use crate::image::GrayFloatImage;
use crate::progress::{NoProgress, ProgressSink};
use crate::refinement::Refinement;
use crate::scale_space::ScaleSpace;
use crate::{Error, Result, Sift};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between a pipeline and its owner.
///
/// Stages check the token between tiles, so a cancelled stage stops after
/// the tiles already running finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One pipeline stage to run.
#[derive(Debug, Clone)]
pub enum Request {
    ComputeScaleSpace(GrayFloatImage),
    ComputeDifferenceOfGaussians,
    FindCandidates,
    RefineCandidates,
}

/// The output of the stage a [`Request`] ran.
#[derive(Debug, Clone, Copy)]
pub enum Response<'a> {
    ScaleSpace(&'a ScaleSpace),
    DifferenceOfGaussians(&'a DifferenceOfGaussians),
    Candidates(&'a Candidates),
    Keypoints(&'a Refinement),
}

/// Outputs of the stages completed so far.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub scale_space: Option<ScaleSpace>,
    pub dog: Option<DifferenceOfGaussians>,
    pub candidates: Option<Candidates>,
    pub refinement: Option<Refinement>,
}

/// Owns the configuration and the state passed from stage to stage.
///
/// Recomputing a stage discards the outputs of every stage after it.
pub struct Pipeline<P: ProgressSink = NoProgress> {
    sift: Sift,
    progress: P,
    cancel: CancelToken,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(sift: Sift) -> Self {
        Self::with_progress(sift, NoProgress)
    }
}

impl<P: ProgressSink> Pipeline<P> {
    pub fn with_progress(sift: Sift, progress: P) -> Self {
        Self {
            sift,
            progress,
            cancel: CancelToken::new(),
            state: PipelineState::default(),
        }
    }

    /// A handle that cancels the stage currently running.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    /// Run one stage on the outputs of the previous one.
    pub fn handle(&mut self, request: Request) -> Result<Response<'_>> {
        let progress: &dyn ProgressSink = &self.progress;
        let state = &mut self.state;
        match request {
            Request::ComputeScaleSpace(image) => {
                *state = PipelineState::default();
                let scale_space = self.sift.build_scale_space(&image, progress, &self.cancel)?;
                Ok(Response::ScaleSpace(state.scale_space.insert(scale_space)))
            }
            Request::ComputeDifferenceOfGaussians => {
                let scale_space = state
                    .scale_space
                    .as_ref()
                    .ok_or(Error::StageOrder("difference of Gaussians"))?;
                let dog = self.sift.build_dog(scale_space, progress, &self.cancel)?;
                state.candidates = None;
                state.refinement = None;
                Ok(Response::DifferenceOfGaussians(state.dog.insert(dog)))
            }
            Request::FindCandidates => {
                let dog = state
                    .dog
                    .as_ref()
                    .ok_or(Error::StageOrder("candidate search"))?;
                let candidates = self.sift.find_candidates(dog, progress, &self.cancel)?;
                state.refinement = None;
                Ok(Response::Candidates(state.candidates.insert(candidates)))
            }
            Request::RefineCandidates => {
                let (dog, candidates) = match (&state.dog, &state.candidates) {
                    (Some(dog), Some(candidates)) => (dog, candidates),
                    _ => return Err(Error::StageOrder("refinement")),
                };
                let refinement = self.sift.refine(dog, candidates, progress, &self.cancel)?;
                Ok(Response::Keypoints(state.refinement.insert(refinement)))
            }
        }
    }

    /// Run all four stages on `image`.
    pub fn run(&mut self, image: GrayFloatImage) -> Result<&Refinement> {
        let requests = [
            Request::ComputeScaleSpace(image),
            Request::ComputeDifferenceOfGaussians,
            Request::FindCandidates,
            Request::RefineCandidates,
        ];
        for request in requests {
            trace!("Handling {:?}.", RequestKind::from(&request));
            self.handle(request)?;
        }
        self.state
            .refinement
            .as_ref()
            .ok_or(Error::StageOrder("refinement"))
    }
}

/// `Request` without its payload, for logging.
#[derive(Debug)]
enum RequestKind {
    ComputeScaleSpace,
    ComputeDifferenceOfGaussians,
    FindCandidates,
    RefineCandidates,
}

impl From<&Request> for RequestKind {
    fn from(request: &Request) -> Self {
        match request {
            Request::ComputeScaleSpace(_) => RequestKind::ComputeScaleSpace,
            Request::ComputeDifferenceOfGaussians => RequestKind::ComputeDifferenceOfGaussians,
            Request::FindCandidates => RequestKind::FindCandidates,
            Request::RefineCandidates => RequestKind::RefineCandidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_requests_fail() {
        let mut pipeline = Pipeline::new(Sift::new(1, 3));
        for request in [
            Request::ComputeDifferenceOfGaussians,
            Request::FindCandidates,
            Request::RefineCandidates,
        ] {
            assert!(matches!(
                pipeline.handle(request),
                Err(Error::StageOrder(_))
            ));
        }
    }

    #[test]
    fn new_scale_space_resets_later_stages() {
        let mut pipeline = Pipeline::new(Sift::new(1, 3));
        let image = GrayFloatImage::from_fn(8, 8, |x, y| ((x * y) % 5) as f32 / 5.0);
        pipeline.run(image.clone()).unwrap();
        assert!(pipeline.state().refinement.is_some());
        pipeline.handle(Request::ComputeScaleSpace(image)).unwrap();
        let state = pipeline.state();
        assert!(state.scale_space.is_some());
        assert!(state.dog.is_none());
        assert!(state.candidates.is_none());
        assert!(state.refinement.is_none());
    }

    #[test]
    fn cancelled_pipeline_stops() {
        let mut pipeline = Pipeline::new(Sift::new(1, 3));
        pipeline.cancel_token().cancel();
        let image = GrayFloatImage::new(8, 8);
        assert_eq!(pipeline.run(image).err(), Some(Error::Cancelled));
    }
}
