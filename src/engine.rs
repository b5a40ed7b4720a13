// Execution engine
// repetitions are spread round-robin over a fixed set of lanes. Each lane is an OS thread with an
// ordered job queue that owns its buffers and transform plans and runs its stages inside the
// thread pool of the device it is bound to. Results travel back to the host thread as messages
// and are written to the output at the offset of their repetition.

use crate::apodization::{apodization_image, deapodize};
use crate::array_utils::{deinterleave, gather_slab, interleave, scatter_slab};
use crate::coil_combine::combine;
use crate::density::pre_compensate;
use crate::fft::{fft2c_batch, Fft2Plan, FftDirection, NormalizationType};
use crate::fftshift::{crop_center, pad_center};
use crate::geometry::{Direction, FrameLayout, Profile, ReconPlan};
use crate::gridding::{degrid, regrid, Gridder};
use crate::pipeline::{Domain, Pipeline, Stage};
use crate::{Complex32, ReconError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// jobs queued per lane ahead of the one it is working on
const QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Running,
    Shutdown,
}

/// Result of a run. `data` is col-maj with dimensions `dims`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconOutput {
    pub data: Vec<Complex32>,
    pub dims: [usize; 4],
}

/// output dimensions of a run whose pipeline ends in `domain`
pub fn output_dims(plan: &ReconPlan, domain: Domain) -> [usize; 4] {
    match domain {
        Domain::NonUniform => [plan.nchan, plan.nrep, plan.nro, plan.npe_per_frame],
        Domain::Grid => [plan.nchan, plan.ngrid, plan.ngrid, plan.nrep],
        Domain::Image => [plan.nchan, plan.nimg, plan.nimg, plan.nrep],
        Domain::Combined => [1, plan.nimg, plan.nimg, plan.nrep],
    }
}

/// Buffers and transform plans owned by one lane. Allocated once when the lane starts and reused
/// for every repetition it is given.
struct LaneResources {
    /// one frame of radial samples, channel fastest
    nonuniform: Vec<Complex32>,
    /// interleaved gridding scratch, also used to stage forward input
    scratch: Vec<Complex32>,
    grid: Vec<Complex32>,
    image: Vec<Complex32>,
    combined: Vec<Complex32>,
    apodization: Vec<f32>,
    profiles: Vec<Profile>,
    gridder: Gridder,
    grid_fft: Fft2Plan,
    /// only built when a transform is applied at image size
    image_fft: Option<Fft2Plan>,
}

impl LaneResources {
    fn new(plan: &ReconPlan, steps: &[(Stage, Domain)], apodization: Vec<f32>) -> Self {
        let image_fft = steps
            .iter()
            .any(|(stage, domain)| matches!(stage, Stage::InverseFft | Stage::ForwardFft) && *domain == Domain::Image)
            .then(|| Fft2Plan::new(plan.nimg));
        Self {
            nonuniform: vec![Complex32::ZERO; plan.nonuniform_len()],
            scratch: vec![Complex32::ZERO; plan.grid_len()],
            grid: vec![Complex32::ZERO; plan.grid_len()],
            image: vec![Complex32::ZERO; plan.image_len()],
            combined: vec![Complex32::ZERO; plan.nimg * plan.nimg],
            apodization,
            profiles: vec![Profile::default(); plan.npe_per_frame],
            gridder: Gridder::new(plan),
            grid_fft: Fft2Plan::new(plan.ngrid),
            image_fft,
        }
    }

    /// copies the input of repetition `rep` out of the shared host array
    fn stage_input(&mut self, plan: &ReconPlan, rep: usize, input: &[Complex32]) {
        let dims = &plan.input_dims;
        match plan.direction {
            Direction::Adjoint => match plan.layout {
                FrameLayout::SlidingWindow => gather_slab(input, dims, 0, rep * plan.dpe, plan.npe_per_frame, &mut self.nonuniform),
                FrameLayout::Stacked => gather_slab(input, dims, rep, 0, plan.npe_per_frame, &mut self.nonuniform),
            },
            Direction::Forward => {
                let staged = &mut self.scratch[..plan.image_len()];
                gather_slab(input, dims, rep, 0, plan.nimg, staged);
                deinterleave(plan.nchan, staged, &mut self.image);
            }
        }
    }

    /// runs every stage on one repetition and returns the data in output layout
    fn process(&mut self, plan: &ReconPlan, steps: &[(Stage, Domain)], rep: usize, input: &[Complex32]) -> Result<Vec<Complex32>, ReconError> {
        self.stage_input(plan, rep, input);
        plan.fill_profiles(rep, &mut self.profiles);

        let mut domain = Domain::initial(plan.direction);
        for &(stage, input_domain) in steps {
            debug_assert_eq!(domain, input_domain);
            match (stage, input_domain) {
                (Stage::PreCompensate, Domain::NonUniform) => pre_compensate(plan, &mut self.nonuniform),
                (Stage::Regrid, Domain::NonUniform) => {
                    regrid(&self.gridder, &self.profiles, &self.nonuniform, &mut self.scratch, &mut self.grid)
                }
                (Stage::Degrid, Domain::Grid) => degrid(&self.gridder, &self.profiles, &self.grid, &mut self.nonuniform),
                (Stage::InverseFft | Stage::ForwardFft, Domain::Grid | Domain::Image) => {
                    let direction = match stage {
                        Stage::InverseFft => FftDirection::Inverse,
                        _ => FftDirection::Forward,
                    };
                    let (fft, data) = match input_domain {
                        Domain::Grid => (Some(&self.grid_fft), &mut self.grid),
                        _ => (self.image_fft.as_ref(), &mut self.image),
                    };
                    let fft = fft.ok_or_else(|| ReconError::Resource("no transform plan for image size".to_string()))?;
                    fft2c_batch(fft, data, direction, NormalizationType::Unitary);
                }
                (Stage::Crop, Domain::Grid) => crop_center(plan.ngrid, plan.nimg, &self.grid, &mut self.image),
                (Stage::Pad, Domain::Image) => pad_center(plan.nimg, plan.ngrid, &self.image, &mut self.grid),
                (Stage::Combine(method), Domain::Image) => {
                    combine(method, &plan.adaptive_combine, plan.nimg, plan.nchan, &self.image, &mut self.combined)
                }
                (Stage::Deapodize, Domain::Image) => deapodize(&self.apodization, &mut self.image),
                (Stage::Deapodize, Domain::Combined) => deapodize(&self.apodization, &mut self.combined),
                _ => {
                    return Err(ReconError::StageMismatch {
                        stage: stage.word().to_string(),
                        domain: input_domain.to_string(),
                    })
                }
            }
            domain = stage.output_domain(input_domain)?;
        }
        Ok(self.retrieve(plan.nchan, domain))
    }

    /// result of the last stage in output layout
    fn retrieve(&self, nchan: usize, domain: Domain) -> Vec<Complex32> {
        let planes = match domain {
            Domain::NonUniform => return self.nonuniform.clone(),
            Domain::Combined => return self.combined.clone(),
            Domain::Grid => &self.grid,
            Domain::Image => &self.image,
        };
        let mut out = vec![Complex32::ZERO; planes.len()];
        interleave(nchan, planes, &mut out);
        out
    }
}

struct Job {
    rep: usize,
    input: Arc<[Complex32]>,
    results: Sender<LaneResult>,
}

struct LaneResult {
    rep: usize,
    lane: usize,
    data: Result<Vec<Complex32>, String>,
}

struct Lane {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "lane panicked".to_string()
    }
}

fn lane_main(index: usize, device: Arc<ThreadPool>, plan: Arc<ReconPlan>, steps: Arc<Vec<(Stage, Domain)>>, apodization: Vec<f32>, jobs: Receiver<Job>) {
    let allocated = catch_unwind(AssertUnwindSafe(|| device.install(|| LaneResources::new(&plan, &steps, apodization))));
    let mut resources = match allocated {
        Ok(resources) => {
            debug!(lane = index, "lane resources allocated");
            Ok(resources)
        }
        Err(payload) => {
            let message = panic_message(payload);
            warn!(lane = index, %message, "lane resource allocation failed");
            Err(message)
        }
    };

    // every job is answered, even when the lane has no resources to run it with
    for job in jobs {
        let now = Instant::now();
        let data = match resources.as_mut() {
            Ok(res) => match catch_unwind(AssertUnwindSafe(|| device.install(|| res.process(&plan, &steps, job.rep, &job.input)))) {
                Ok(Ok(data)) => Ok(data),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(panic_message(payload)),
            },
            Err(message) => Err(format!("lane has no resources: {message}")),
        };
        debug!(lane = index, rep = job.rep, elapsed_ms = now.elapsed().as_millis() as u64, "repetition processed");
        // the host stops listening when a run is abandoned. The lane stays up for the next run
        if job.results.send(LaneResult { rep: job.rep, lane: index, data }).is_err() {
            debug!(lane = index, rep = job.rep, "result dropped, host is no longer waiting");
        }
    }
    debug!(lane = index, "lane shut down");
}

/// Runs a reconstruction plan over all repetitions of an input array
pub struct ExecutionEngine {
    plan: Arc<ReconPlan>,
    pipeline: Pipeline,
    steps: Arc<Vec<(Stage, Domain)>>,
    final_domain: Domain,
    lanes: Vec<Lane>,
    state: EngineState,
}

impl ExecutionEngine {
    /// Validates the plan and type-checks the pipeline against it. Nothing is allocated yet.
    pub fn new(plan: ReconPlan, pipeline: Pipeline) -> Result<Self, ReconError> {
        plan.validate()?;
        let steps = pipeline.steps(plan.direction)?;
        let final_domain = pipeline.check(plan.direction)?;
        Ok(Self {
            plan: Arc::new(plan),
            pipeline,
            steps: Arc::new(steps),
            final_domain,
            lanes: vec![],
            state: EngineState::Uninitialized,
        })
    }

    /// Builds `devices` thread pools and starts `lanes` lanes, bound to devices round-robin.
    /// The apodization image is computed here, once, before any lane starts.
    pub fn initialize(&mut self, lanes: usize, devices: usize) -> Result<(), ReconError> {
        if self.state != EngineState::Uninitialized {
            return Err(ReconError::Resource(format!("engine cannot be initialized from state {:?}", self.state)));
        }
        if lanes == 0 || devices == 0 {
            return Err(ReconError::InvalidParameter(format!("lanes ({lanes}) and devices ({devices}) must be positive")));
        }

        let apodization = if self.pipeline.uses(|s| *s == Stage::Deapodize) {
            apodization_image(&self.plan)
        } else {
            vec![]
        };

        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let threads_per_device = (threads / devices).max(1);
        let pools = (0..devices)
            .map(|d| {
                ThreadPoolBuilder::new()
                    .num_threads(threads_per_device)
                    .thread_name(move |i| format!("device-{d}-{i}"))
                    .build()
                    .map(Arc::new)
                    .map_err(|e| ReconError::Resource(format!("failed to build thread pool for device {d}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(devices, threads_per_device, lanes, "devices ready");

        for index in 0..lanes {
            let (tx, rx) = channel();
            let device = pools[index % devices].clone();
            let plan = self.plan.clone();
            let steps = self.steps.clone();
            let apod = apodization.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("lane-{index}"))
                .spawn(move || lane_main(index, device, plan, steps, apod, rx));
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    self.stop_lanes();
                    return Err(ReconError::Resource(format!("failed to start lane {index}: {e}")));
                }
            };
            self.lanes.push(Lane {
                jobs: Some(tx),
                handle: Some(handle),
            });
        }

        self.state = EngineState::Ready;
        info!(pipeline = %self.pipeline, nrep = self.plan.nrep, "engine ready");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn plan(&self) -> &ReconPlan {
        &self.plan
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn output_dims(&self) -> [usize; 4] {
        output_dims(&self.plan, self.final_domain)
    }

    /// Processes every repetition of `input`, a col-maj array with the plan's input dimensions.
    /// Repetition `t` runs on lane `t % lanes`. After the first failure no further repetitions are
    /// dispatched; those already queued are drained before the error is returned.
    pub fn run(&mut self, input: impl Into<Arc<[Complex32]>>) -> Result<ReconOutput, ReconError> {
        if self.state != EngineState::Ready {
            return Err(ReconError::Resource(format!("engine cannot run from state {:?}", self.state)));
        }
        let input: Arc<[Complex32]> = input.into();
        let expected = self.plan.input_dims.iter().product::<usize>();
        if input.len() != expected {
            return Err(ReconError::InvalidGeometry(format!(
                "input holds {} samples but dims {:?} need {expected}",
                input.len(),
                self.plan.input_dims
            )));
        }

        self.state = EngineState::Running;
        let now = Instant::now();
        let result = self.dispatch(input);
        self.state = EngineState::Ready;
        if result.is_ok() {
            info!(nrep = self.plan.nrep, elapsed_ms = now.elapsed().as_millis() as u64, "run complete");
        }
        result
    }

    fn dispatch(&self, input: Arc<[Complex32]>) -> Result<ReconOutput, ReconError> {
        let nrep = self.plan.nrep;
        let nlanes = self.lanes.len();
        let dims = self.output_dims();
        let mut data = vec![Complex32::ZERO; dims.iter().product()];
        let (tx, rx) = channel();

        let send = |rep: usize| -> Result<(), ReconError> {
            let lane = rep % nlanes;
            let job = Job {
                rep,
                input: input.clone(),
                results: tx.clone(),
            };
            self.lanes[lane]
                .jobs
                .as_ref()
                .ok_or_else(|| ReconError::Lane { lane, message: "lane queue is closed".to_string() })?
                .send(job)
                .map_err(|_| ReconError::Lane { lane, message: "lane is no longer running".to_string() })
        };

        let mut first_error: Option<ReconError> = None;
        let mut next = 0;
        let mut in_flight = 0;
        while next < nrep.min(QUEUE_DEPTH * nlanes) {
            send(next)?;
            next += 1;
            in_flight += 1;
        }

        while in_flight > 0 {
            let result = rx
                .recv()
                .map_err(|_| ReconError::Resource("all lanes stopped before the run completed".to_string()))?;
            in_flight -= 1;
            match result.data {
                Ok(block) => self.place(result.rep, &block, &mut data),
                Err(message) => {
                    warn!(lane = result.lane, rep = result.rep, %message, "repetition failed");
                    first_error.get_or_insert(ReconError::Lane { lane: result.lane, message });
                }
            }
            if first_error.is_none() && next < nrep {
                match send(next) {
                    Ok(()) => {
                        next += 1;
                        in_flight += 1;
                    }
                    Err(e) => {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(ReconOutput { data, dims }),
        }
    }

    /// writes the block of repetition `rep` to its offset in the output
    fn place(&self, rep: usize, block: &[Complex32], data: &mut [Complex32]) {
        match self.final_domain {
            Domain::NonUniform => scatter_slab(block, &self.output_dims(), rep, data),
            _ => {
                let start = rep * block.len();
                data[start..start + block.len()].copy_from_slice(block);
            }
        }
    }

    /// closes every lane queue and waits for the lanes to exit
    fn stop_lanes(&mut self) -> Vec<usize> {
        self.lanes.iter_mut().for_each(|lane| drop(lane.jobs.take()));
        let mut failed = vec![];
        for (index, lane) in self.lanes.iter_mut().enumerate() {
            if let Some(handle) = lane.handle.take() {
                if handle.join().is_err() {
                    failed.push(index);
                }
            }
        }
        self.lanes.clear();
        failed
    }

    /// Releases every lane and its resources
    pub fn shutdown(mut self) -> Result<(), ReconError> {
        let failed = self.stop_lanes();
        self.state = EngineState::Shutdown;
        info!("engine shut down");
        match failed.first() {
            Some(&lane) => Err(ReconError::Lane { lane, message: "lane thread panicked".to_string() }),
            None => Ok(()),
        }
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        if !self.lanes.is_empty() {
            self.stop_lanes();
        }
    }
}

/// Convenience wrapper: plan, initialize, run and shut down in one call
pub fn reconstruct(plan: ReconPlan, pipeline: Pipeline, lanes: usize, devices: usize, input: impl Into<Arc<[Complex32]>>) -> Result<ReconOutput, ReconError> {
    let mut engine = ExecutionEngine::new(plan, pipeline)?;
    engine.initialize(lanes, devices)?;
    let output = engine.run(input)?;
    engine.shutdown()?;
    Ok(output)
}
