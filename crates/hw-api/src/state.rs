use std::sync::Arc;

use hw_db::Repository;
use hw_infra::Providers;

use crate::config::AppConfig;
use crate::sns::SnsVerifier;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub providers: Providers,
    pub verifier: SnsVerifier,
    pub config: AppConfig,
}
