use std::sync::Arc;

use crate::{config::ServerConfig, share::ShareResolver, upload::UploadCoordinator};

#[derive(Clone)]
pub struct RouteState {
    pub coordinator: UploadCoordinator,
    pub resolver: Arc<ShareResolver>,
    pub config: Arc<ServerConfig>,
}
