use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::Connection;
use serde::Deserialize;

use crate::attendance::capture::PushFeed;
use crate::attendance::Scanner;
use crate::config::Config;
use crate::enrollment::Enrollment;
use crate::matcher::MatcherGateway;
use crate::provider::{GeminiProvider, RecognitionProvider};
use crate::session::TenantSession;
use crate::store::RecordStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Arc<Mutex<Connection>>>,
    pub store: Option<Arc<RecordStore>>,
    pub provider: Arc<dyn RecognitionProvider>,
    pub gateway: Arc<MatcherGateway>,
    pub feed: PushFeed,
    pub scanner: Option<Scanner>,
    pub session: Option<TenantSession>,
    pub enrollment: Enrollment,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let provider = GeminiProvider::new(config.provider.settings()).context("building provider client")?;
        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    pub fn with_provider(config: Config, provider: Arc<dyn RecognitionProvider>) -> Self {
        let gateway = Arc::new(MatcherGateway::new(provider.clone(), config.matcher.clone()));
        AppState {
            config,
            workspace: None,
            db: None,
            store: None,
            provider,
            gateway,
            feed: PushFeed::new(),
            scanner: None,
            session: None,
            enrollment: Enrollment::new(),
        }
    }

    /// Stops the scanner and forgets the tenant's draft work.
    pub async fn end_tenant_work(&mut self) {
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.stop().await;
        }
        self.enrollment = Enrollment::new();
    }

    pub async fn shutdown(&mut self) {
        self.end_tenant_work().await;
    }
}
