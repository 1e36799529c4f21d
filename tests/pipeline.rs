//! Pipeline state machine tests on the CPU backend.

use image::Rgba32FImage;
use signed_render::graph::{CompiledScene, GraphBuilder, SceneGraph};
use signed_render::render::{
    CpuBackend, CpuKit, CpuProgram, Extent, FrameInputs, IconPhase, IconSubject, MainPhase, PipelineEvent, RenderBackend,
    RenderPipeline, RenderSettings, RenderTarget,
};
use signed_render::Result;

/// CPU backend that counts what the pipeline asks of it.
struct Counting {
    inner: CpuBackend,
    programs: usize,
    allocations: Vec<(RenderTarget, Extent)>,
    clears: usize,
    samples: usize,
}

impl Counting {
    fn new(max_pixels: usize) -> Self {
        let inner = CpuBackend::new(&settings()).expect("backend").with_max_pixels(max_pixels);
        Self { inner, programs: 0, allocations: Vec::new(), clears: 0, samples: 0 }
    }

    fn main_allocations(&self) -> usize {
        self.allocations.iter().filter(|(t, _)| *t == RenderTarget::Main).count()
    }
}

impl RenderBackend for Counting {
    type Kit = CpuKit;
    type Program = CpuProgram;

    fn name(&self) -> &'static str {
        "counting"
    }

    fn build_program(&mut self, scene: &CompiledScene) -> Result<CpuProgram> {
        self.programs += 1;
        self.inner.build_program(scene)
    }

    fn allocate_kit(&mut self, target: RenderTarget, extent: Extent) -> Result<CpuKit> {
        self.allocations.push((target, extent));
        self.inner.allocate_kit(target, extent)
    }

    fn clear_kit(&mut self, kit: &mut CpuKit) -> Result<()> {
        self.clears += 1;
        self.inner.clear_kit(kit)
    }

    fn render_sample(&mut self, program: &CpuProgram, kit: &mut CpuKit, frame: &FrameInputs) -> Result<()> {
        self.samples += 1;
        self.inner.render_sample(program, kit, frame)
    }

    fn read_output(&mut self, kit: &CpuKit) -> Result<Rgba32FImage> {
        self.inner.read_output(kit)
    }
}

fn settings() -> RenderSettings {
    RenderSettings {
        max_samples: 4,
        max_depth: 2,
        resolution: [8, 8],
        icon_size: 4,
        icon_samples: 2,
        icon_max_depth: 1,
        workers: 1,
        seed: Some(11),
        ..Default::default()
    }
}

fn graph(albedo: &str) -> SceneGraph {
    GraphBuilder::new()
        .material("Red", |m| m.set("albedo", albedo))
        .material("Chrome", |m| m.set("albedo", "0.9, 0.9, 0.9").set("metallic", "1"))
        .render(&[], |r| {
            r.camera(&[("Origin", "0, 0, -5")])
                .sun(&[])
                .analytical(&[("Material", "Red")], |o| o.sphere(&[]))
        })
        .build()
}

fn pipeline(max_pixels: usize) -> (RenderPipeline<Counting>, std::sync::mpsc::Receiver<PipelineEvent>) {
    let (mut p, rx) = RenderPipeline::new(Counting::new(max_pixels), settings());
    p.set_graph(&graph("0.8, 0.1, 0.1")).expect("graph");
    (p, rx)
}

#[test]
fn test_converges_at_budget() {
    let (mut p, rx) = pipeline(usize::MAX);
    assert_eq!(p.run_until_converged(100).unwrap(), 4);
    assert_eq!(p.main_phase(), MainPhase::Idle);
    assert_eq!(p.backend().samples, 4);

    // Idle ticks do no work.
    p.tick().unwrap();
    assert_eq!(p.backend().samples, 4);
    let converged: Vec<_> = rx.try_iter().filter(|e| matches!(e, PipelineEvent::Converged { .. })).collect();
    assert_eq!(converged.len(), 1);
}

#[test]
fn test_restart_is_idempotent() {
    let (mut p, _rx) = pipeline(usize::MAX);
    p.tick().unwrap();
    p.tick().unwrap();
    assert_eq!(p.samples(), 2);

    let handle = p.handle();
    handle.restart();
    handle.restart();
    handle.restart();
    let report = p.tick().unwrap();
    assert!(report.restarted);
    assert_eq!(report.main_samples, Some(1));
    assert_eq!(p.backend().clears, 1);

    let report = p.tick().unwrap();
    assert!(!report.restarted);
    assert_eq!(p.samples(), 2);
}

#[test]
fn test_resize_reallocates_once() {
    let (mut p, _rx) = pipeline(usize::MAX);
    p.tick().unwrap();
    assert_eq!(p.backend().main_allocations(), 1);

    let handle = p.handle();
    handle.set_target_resolution(16, 4);
    handle.set_target_resolution(12, 6);
    let report = p.tick().unwrap();
    assert!(report.reallocated);
    assert_eq!(report.main_samples, Some(1));
    p.tick().unwrap();
    assert_eq!(p.backend().main_allocations(), 2);
    assert_eq!(p.backend().allocations.last(), Some(&(RenderTarget::Main, Extent::new(12, 6))));

    let image = p.read_main().unwrap().expect("main image");
    assert_eq!(image.dimensions(), (12, 6));
}

#[test]
fn test_max_samples_change_resumes() {
    let (mut p, _rx) = pipeline(usize::MAX);
    p.run_until_converged(100).unwrap();
    p.handle().set_max_samples(6);
    assert_eq!(p.main_phase(), MainPhase::Rendering { samples: 4 });
    assert_eq!(p.run_until_converged(100).unwrap(), 6);
}

#[test]
fn test_allocation_failure_waits_for_invalidate() {
    let (mut p, _rx) = pipeline(64);
    p.handle().set_target_resolution(10, 10);
    let report = p.tick().unwrap();
    assert!(!report.reallocated);
    assert_eq!(report.main_samples, None);
    assert_eq!(p.main_phase(), MainPhase::Idle);

    // No retry until something invalidates the view.
    p.tick().unwrap();
    assert_eq!(p.backend().main_allocations(), 1);

    p.handle().restart();
    p.tick().unwrap();
    assert_eq!(p.backend().main_allocations(), 2);

    p.handle().set_target_resolution(8, 8);
    let report = p.tick().unwrap();
    assert!(report.reallocated);
    assert_eq!(report.main_samples, Some(1));
}

#[test]
fn test_icons_complete_in_fifo_order() {
    let (mut p, rx) = pipeline(usize::MAX);
    let handle = p.handle();
    let first = handle.enqueue_icon(IconSubject::Material("Chrome".into()));
    let second = handle.enqueue_icon(IconSubject::Scene);
    let third = handle.enqueue_icon(IconSubject::Material("Red".into()));
    assert_eq!(p.icon_phase(), IconPhase::Queued(3));

    for _ in 0..6 {
        p.tick().unwrap();
    }
    let finished: Vec<_> = rx
        .try_iter()
        .filter_map(|e| match e {
            PipelineEvent::IconFinished { id, image } => {
                assert_eq!(image.dimensions(), (4, 4));
                Some(id)
            }
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![first, second, third]);
    assert_eq!(p.icon_phase(), IconPhase::Idle);
    // Icon kit is reused across commands.
    let icon_allocs = p.backend().allocations.iter().filter(|(t, _)| *t == RenderTarget::Icon).count();
    assert_eq!(icon_allocs, 1);
}

#[test]
fn test_unknown_icon_material_is_dropped() {
    let (mut p, rx) = pipeline(usize::MAX);
    let handle = p.handle();
    let missing = handle.enqueue_icon(IconSubject::Material("Gold".into()));
    let next = handle.enqueue_icon(IconSubject::Scene);
    p.tick().unwrap();
    p.tick().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(&events[0], PipelineEvent::IconDropped { id, .. } if *id == missing));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::IconFinished { id, .. } if *id == next)));
}

#[test]
fn test_icon_allocation_failure_keeps_queue() {
    let (mut p, _rx) = pipeline(15);
    p.handle().set_target_resolution(3, 3);
    p.handle().enqueue_icon(IconSubject::Scene);
    p.tick().unwrap();
    assert_eq!(p.icon_phase(), IconPhase::Queued(1));
    assert_eq!(p.handle().queued_icons(), 1);

    // Retried only after an invalidate.
    p.tick().unwrap();
    let icon_allocs = |p: &RenderPipeline<Counting>| p.backend().allocations.iter().filter(|(t, _)| *t == RenderTarget::Icon).count();
    assert_eq!(icon_allocs(&p), 1);
    p.handle().restart();
    p.tick().unwrap();
    assert_eq!(icon_allocs(&p), 2);
    assert_eq!(p.handle().queued_icons(), 1);
}

#[test]
fn test_compile_error_keeps_last_program() {
    let (mut p, _rx) = pipeline(usize::MAX);
    p.tick().unwrap();
    let hash = p.scene().map(|s| s.program.hash);

    let broken = GraphBuilder::new()
        .material("Red", |m| m.set("albedo", "0.8 +"))
        .render(&[], |r| r.camera(&[]))
        .build();
    assert!(p.set_graph(&broken).is_err());
    assert_eq!(p.scene().map(|s| s.program.hash), hash);

    let report = p.tick().unwrap();
    assert!(!report.restarted);
    assert_eq!(report.main_samples, Some(2));
}

#[test]
fn test_program_cache_by_hash() {
    let (mut p, _rx) = pipeline(usize::MAX);
    p.set_graph(&graph("0.2, 0.9, 0.1")).unwrap();
    p.set_graph(&graph("0.8, 0.1, 0.1")).unwrap();
    assert_eq!(p.cached_programs(), 2);
    assert_eq!(p.backend().programs, 2);
}

#[test]
fn test_render_samples_option_sets_budget() {
    let graph = GraphBuilder::new()
        .render(&[("Samples", "3")], |r| r.camera(&[]))
        .build();
    let (mut p, _rx) = RenderPipeline::new(Counting::new(usize::MAX), settings());
    p.set_graph(&graph).unwrap();
    assert_eq!(p.run_until_converged(50).unwrap(), 3);
}

#[test]
fn test_shared_submission_gate() {
    let (a, _rx_a) = pipeline(usize::MAX);
    let (b, _rx_b) = RenderPipeline::new(Counting::new(usize::MAX), settings());
    let b = b.with_submission_gate(a.submission_gate());
    let gate = a.submission_gate();
    assert!(std::sync::Arc::ptr_eq(&gate, &b.submission_gate()));

    let held = gate.lock();
    assert!(b.submission_gate().try_lock().is_none());
    drop(held);
}
