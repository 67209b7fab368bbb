//! Mock construction helpers

use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uwv_dataflow::pipeline::nodes::{DisplayKind, SharedSink, VisualizationSink};
use uwv_dataflow::pipeline::Sample;

mock! {
    pub Renderer {}

    impl VisualizationSink for Renderer {
        fn update(&mut self, kind: DisplayKind, sample: &Sample);
    }
}

/// A renderer that accepts updates of `kind` only and counts them
pub fn counting_renderer(kind: DisplayKind) -> (SharedSink, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let mut renderer = MockRenderer::new();
    renderer
        .expect_update()
        .withf(move |k, _| *k == kind)
        .returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    (Arc::new(Mutex::new(renderer)), count)
}
