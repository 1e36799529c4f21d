//! Progressive multi-pass render pipeline.
//!
//! One driving thread calls [`RenderPipeline::tick`]. Each tick:
//!
//! 1. consumes the restart flag and the requested resolution; a resolution
//!    change reallocates the main kit, a bare restart clears it
//! 2. renders one main-view sample unless the sample budget is spent
//! 3. renders one sample of the active thumbnail, finishing it and priming
//!    the next queued command when its budget is reached
//!
//! Other threads talk to the pipeline only through a [`PipelineHandle`]
//! (atomic flags and the icon queue) and receive results as
//! [`PipelineEvent`]s.

use image::Rgba32FImage;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use super::backend::RenderBackend;
use super::kit::{Extent, KitArena, RenderTarget};
use super::settings::RenderSettings;
use super::uniforms::{icon_frame, main_frame};
use crate::graph::{compile, compile_at, CompiledScene, SceneGraph};
use crate::util::Result;

/// Identity of a thumbnail request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IconId(pub u64);

/// What a thumbnail shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IconSubject {
    /// Named material on the preview sphere
    Material(String),
    /// Scene geometry under the fixed thumbnail camera and sun
    Scene,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconCommand {
    pub id: IconId,
    pub subject: IconSubject,
}

/// Notifications sent to the presentation layer.
#[derive(Debug)]
pub enum PipelineEvent {
    IconFinished { id: IconId, image: Rgba32FImage },
    /// Command whose subject does not exist in the current scene
    IconDropped { id: IconId, reason: String },
    /// Main view reached its sample budget
    Converged { samples: u32 },
}

/// Main-view state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainPhase {
    Idle,
    Rendering { samples: u32 },
}

/// Thumbnail state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IconPhase {
    Idle,
    Queued(usize),
    Rendering { id: IconId, samples: u32 },
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub restarted: bool,
    pub reallocated: bool,
    /// Main sample count after this tick, if a sample was rendered
    pub main_samples: Option<u32>,
    /// Active thumbnail and its sample count, if a sample was rendered
    pub icon: Option<(IconId, u32)>,
    pub finished_icon: Option<IconId>,
}

/// Cross-thread signals. Everything else belongs to the driving thread.
#[derive(Debug)]
struct Signals {
    restart: AtomicBool,
    resolution: AtomicU64,
    max_samples: AtomicU32,
    icons: Mutex<VecDeque<IconCommand>>,
    next_icon: AtomicU64,
}

/// Cloneable control surface for other threads.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    signals: Arc<Signals>,
}

impl PipelineHandle {
    /// Invalidate the main view. Takes effect at the next tick; repeated
    /// calls between ticks collapse into one.
    pub fn restart(&self) {
        self.signals.restart.store(true, Ordering::Release);
    }

    /// Queue a thumbnail; commands complete in FIFO order.
    pub fn enqueue_icon(&self, subject: IconSubject) -> IconId {
        let id = IconId(self.signals.next_icon.fetch_add(1, Ordering::Relaxed));
        self.signals.icons.lock().push_back(IconCommand { id, subject });
        id
    }

    pub fn set_target_resolution(&self, width: u32, height: u32) {
        self.signals.resolution.store(Extent::new(width, height).pack(), Ordering::Release);
    }

    pub fn set_max_samples(&self, samples: u32) {
        self.signals.max_samples.store(samples, Ordering::Release);
    }

    pub fn queued_icons(&self) -> usize {
        self.signals.icons.lock().len()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct TargetState {
    extent: Extent,
    samples: u32,
    alloc_failed: bool,
    converged: bool,
}

#[derive(Clone, Debug)]
struct ActiveIcon {
    command: IconCommand,
    preview: i32,
    samples: u32,
}

/// Progressive path tracing pipeline over a [`RenderBackend`].
pub struct RenderPipeline<B: RenderBackend> {
    backend: B,
    settings: RenderSettings,
    signals: Arc<Signals>,
    /// Binary semaphore around batch construction and submission
    gate: Arc<Mutex<()>>,
    scene: Option<Arc<CompiledScene>>,
    program: Option<Arc<B::Program>>,
    programs: HashMap<u64, Arc<B::Program>>,
    kits: KitArena<B::Kit>,
    main: TargetState,
    icon: TargetState,
    active_icon: Option<ActiveIcon>,
    events: Sender<PipelineEvent>,
    rng: StdRng,
}

impl<B: RenderBackend> RenderPipeline<B> {
    pub fn new(backend: B, settings: RenderSettings) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = channel();
        let [width, height] = settings.resolution;
        let signals = Arc::new(Signals {
            restart: AtomicBool::new(false),
            resolution: AtomicU64::new(Extent::new(width, height).pack()),
            max_samples: AtomicU32::new(settings.max_samples),
            icons: Mutex::new(VecDeque::new()),
            next_icon: AtomicU64::new(1),
        });
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pipeline = Self {
            backend,
            settings,
            signals,
            gate: Arc::new(Mutex::new(())),
            scene: None,
            program: None,
            programs: HashMap::new(),
            kits: KitArena::new(),
            main: TargetState::default(),
            icon: TargetState::default(),
            active_icon: None,
            events: tx,
            rng,
        };
        (pipeline, rx)
    }

    /// Share a submission gate with other pipelines on the same queue.
    pub fn with_submission_gate(mut self, gate: Arc<Mutex<()>>) -> Self {
        self.gate = gate;
        self
    }

    pub fn submission_gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.gate)
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle { signals: Arc::clone(&self.signals) }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn scene(&self) -> Option<&CompiledScene> {
        self.scene.as_deref()
    }

    /// Number of distinct programs built so far.
    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn main_phase(&self) -> MainPhase {
        let ready = self.program.is_some() && self.kits.get(RenderTarget::Main).is_some();
        if ready && self.main.samples < self.signals.max_samples.load(Ordering::Acquire) {
            MainPhase::Rendering { samples: self.main.samples }
        } else {
            MainPhase::Idle
        }
    }

    pub fn icon_phase(&self) -> IconPhase {
        match &self.active_icon {
            Some(a) => IconPhase::Rendering { id: a.command.id, samples: a.samples },
            None => match self.signals.icons.lock().len() {
                0 => IconPhase::Idle,
                n => IconPhase::Queued(n),
            },
        }
    }

    pub fn samples(&self) -> u32 {
        self.main.samples
    }

    /// Compile and install `graph`. On failure the previous program keeps
    /// rendering and the error is returned.
    pub fn set_graph(&mut self, graph: &SceneGraph) -> Result<()> {
        match compile(graph) {
            Ok(scene) => self.install(scene),
            Err(e) => {
                tracing::warn!(line = e.line, error = %e.kind, "compile failed, keeping the last program");
                Err(e.into())
            }
        }
    }

    /// Re-evaluate animated options at `time`.
    pub fn set_time(&mut self, graph: &SceneGraph, time: f32) -> Result<()> {
        let next = match &self.scene {
            Some(scene) => {
                let mut next = CompiledScene::clone(scene);
                next.refresh(graph, time).map(|_| next)
            }
            None => compile_at(graph, time),
        };
        match next {
            Ok(scene) => self.install(scene),
            Err(e) => {
                tracing::warn!(line = e.line, error = %e.kind, time, "refresh failed, keeping the last program");
                Err(e.into())
            }
        }
    }

    /// Install a compiled scene, reusing a cached program with the same hash.
    pub fn install(&mut self, scene: CompiledScene) -> Result<()> {
        let hash = scene.program.hash;
        let program = match self.programs.get(&hash) {
            Some(p) => Arc::clone(p),
            None => {
                let p = Arc::new(self.backend.build_program(&scene)?);
                tracing::info!(hash, backend = self.backend.name(), materials = scene.materials.len(), "program built");
                self.programs.insert(hash, Arc::clone(&p));
                p
            }
        };
        if let Some(samples) = scene.render.samples {
            self.signals.max_samples.store(samples, Ordering::Release);
        }
        self.scene = Some(Arc::new(scene));
        self.program = Some(program);
        self.handle().restart();
        Ok(())
    }

    /// Run one tick.
    #[tracing::instrument(skip_all, fields(backend = self.backend.name()))]
    pub fn tick(&mut self) -> Result<TickReport> {
        let gate = Arc::clone(&self.gate);
        let _submission = gate.lock();

        let mut report = TickReport { restarted: self.signals.restart.swap(false, Ordering::AcqRel), ..Default::default() };
        if report.restarted {
            self.icon.alloc_failed = false;
        }
        self.prepare_main(&mut report)?;
        self.render_main(&mut report)?;
        self.step_icon(&mut report)?;
        tracing::debug!(?report, "tick");
        Ok(report)
    }

    /// Tick until the main view converges or `max_ticks` run out; returns
    /// the sample count reached.
    pub fn run_until_converged(&mut self, max_ticks: usize) -> Result<u32> {
        for _ in 0..max_ticks {
            self.tick()?;
            if self.main.converged {
                break;
            }
        }
        Ok(self.main.samples)
    }

    /// Current main-view average, `None` before the first allocation.
    pub fn read_main(&mut self) -> Result<Option<Rgba32FImage>> {
        match self.kits.get(RenderTarget::Main) {
            Some(kit) => self.backend.read_output(kit).map(Some),
            None => Ok(None),
        }
    }

    fn prepare_main(&mut self, report: &mut TickReport) -> Result<()> {
        let wanted = Extent::unpack(self.signals.resolution.load(Ordering::Acquire));
        let resized = wanted != self.main.extent;
        if resized || (report.restarted && self.main.alloc_failed) {
            self.kits.remove(RenderTarget::Main);
            self.main = TargetState { extent: wanted, ..Default::default() };
            if wanted.is_empty() {
                return Ok(());
            }
            match self.backend.allocate_kit(RenderTarget::Main, wanted) {
                Ok(kit) => {
                    self.kits.insert(RenderTarget::Main, kit);
                    report.reallocated = true;
                    tracing::info!(width = wanted.width, height = wanted.height, "main kit allocated");
                }
                Err(e) if e.is_resource() => {
                    tracing::warn!(error = %e, "main kit allocation failed, retrying on the next invalidate");
                    self.main.alloc_failed = true;
                }
                Err(e) => return Err(e),
            }
        } else if report.restarted {
            if let Some(kit) = self.kits.get_mut(RenderTarget::Main) {
                self.backend.clear_kit(kit)?;
            }
            self.main.samples = 0;
            self.main.converged = false;
        }
        Ok(())
    }

    fn render_main(&mut self, report: &mut TickReport) -> Result<()> {
        let (Some(scene), Some(program)) = (&self.scene, &self.program) else { return Ok(()) };
        let Some(kit) = self.kits.get_mut(RenderTarget::Main) else { return Ok(()) };
        let max = self.signals.max_samples.load(Ordering::Acquire);
        if self.main.samples < max {
            self.main.converged = false;
            let frame = main_frame(scene, &self.settings, self.main.extent, self.main.samples, &mut self.rng)?;
            let _span = tracing::info_span!("main_sample", sample = self.main.samples).entered();
            self.backend.render_sample(program, kit, &frame)?;
            self.main.samples += 1;
            report.main_samples = Some(self.main.samples);
        }
        if self.main.samples >= max && !self.main.converged {
            self.main.converged = true;
            tracing::info!(samples = self.main.samples, "main view converged");
            let _ = self.events.send(PipelineEvent::Converged { samples: self.main.samples });
        }
        Ok(())
    }

    fn step_icon(&mut self, report: &mut TickReport) -> Result<()> {
        if self.active_icon.is_none() {
            self.prime_icon()?;
        }
        let (Some(scene), Some(program)) = (&self.scene, &self.program) else { return Ok(()) };
        let Some(active) = self.active_icon.as_mut() else { return Ok(()) };
        let Some(kit) = self.kits.get_mut(RenderTarget::Icon) else { return Ok(()) };

        let frame = icon_frame(scene, active.preview, &self.settings, self.icon.extent, active.samples, &mut self.rng);
        {
            let _span = tracing::info_span!("icon_sample", id = active.command.id.0, sample = active.samples).entered();
            self.backend.render_sample(program, kit, &frame)?;
        }
        active.samples += 1;
        report.icon = Some((active.command.id, active.samples));

        if active.samples >= self.settings.icon_samples.max(1) {
            let id = active.command.id;
            let image = self.backend.read_output(kit)?;
            self.active_icon = None;
            tracing::info!(id = id.0, "icon finished");
            let _ = self.events.send(PipelineEvent::IconFinished { id, image });
            report.finished_icon = Some(id);
            self.prime_icon()?;
        }
        Ok(())
    }

    /// Pop the next renderable command and reset the icon kit for it.
    fn prime_icon(&mut self) -> Result<()> {
        let Some(scene) = self.scene.clone() else { return Ok(()) };
        loop {
            let Some(command) = self.signals.icons.lock().pop_front() else { return Ok(()) };
            let preview = match &command.subject {
                IconSubject::Scene => -1,
                IconSubject::Material(name) => match scene.material_index(name) {
                    Some(index) => index as i32,
                    None => {
                        tracing::warn!(id = command.id.0, material = %name, "icon dropped, unknown material");
                        let reason = format!("Unknown material '{name}'");
                        let _ = self.events.send(PipelineEvent::IconDropped { id: command.id, reason });
                        continue;
                    }
                },
            };
            if !self.ensure_icon_kit()? {
                self.signals.icons.lock().push_front(command);
                return Ok(());
            }
            if let Some(kit) = self.kits.get_mut(RenderTarget::Icon) {
                self.backend.clear_kit(kit)?;
            }
            self.active_icon = Some(ActiveIcon { command, preview, samples: 0 });
            return Ok(());
        }
    }

    fn ensure_icon_kit(&mut self) -> Result<bool> {
        let size = Extent::new(self.settings.icon_size, self.settings.icon_size);
        if self.kits.extent(RenderTarget::Icon) == Some(size) {
            return Ok(true);
        }
        if self.icon.alloc_failed {
            return Ok(false);
        }
        self.kits.remove(RenderTarget::Icon);
        match self.backend.allocate_kit(RenderTarget::Icon, size) {
            Ok(kit) => {
                self.kits.insert(RenderTarget::Icon, kit);
                self.icon = TargetState { extent: size, ..Default::default() };
                Ok(true)
            }
            Err(e) if e.is_resource() => {
                tracing::warn!(error = %e, "icon kit allocation failed, retrying on the next invalidate");
                self.icon.alloc_failed = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
