use imo_engine::{
    Host, ImoConfig, MemoryStore, OverrideEngine, PageContext, ReqwestFetcher, ScriptContent,
    ScriptSink,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingSink {
    scripts: Mutex<Vec<(String, ScriptContent)>>,
}

impl RecordingSink {
    pub fn scripts(&self) -> Vec<(String, ScriptContent)> {
        self.scripts.lock().expect("lock").clone()
    }
}

impl ScriptSink for RecordingSink {
    fn insert(&self, content: ScriptContent, id: &str) {
        self.scripts
            .lock()
            .expect("lock")
            .push((id.to_string(), content));
    }

    fn remove_by_id(&self, id: &str) {
        self.scripts
            .lock()
            .expect("lock")
            .retain(|(existing, _)| existing != id);
    }
}

pub fn page(hostname: &str) -> PageContext {
    PageContext {
        hostname: hostname.to_string(),
        url: Some(format!("https://{hostname}/")),
        base_url: Some(format!("https://{hostname}/")),
        ..Default::default()
    }
}

pub struct Harness {
    pub engine: OverrideEngine,
    pub medium: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
}

pub fn start(config: ImoConfig, page: PageContext) -> Harness {
    start_with_medium(config, page, Arc::new(MemoryStore::new()))
}

pub fn start_with_medium(config: ImoConfig, page: PageContext, medium: Arc<MemoryStore>) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let host = Host::new(page, medium.clone(), Arc::new(ReqwestFetcher::new())).with_sink(sink.clone());
    let engine = OverrideEngine::create(config, host)
        .expect("create")
        .into_active()
        .expect("engine should be active");
    Harness {
        engine,
        medium,
        sink,
    }
}
