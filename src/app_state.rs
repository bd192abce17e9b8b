use std::sync::Arc;

use crate::config::Config;
use crate::hub::Hub;
use crate::storage::ProviderRegistry;
use crate::uploads::UploadRegistry;

pub struct AppState {
	pub config: Arc<Config>,
	pub hub: Arc<Hub>,
	pub providers: Arc<ProviderRegistry>,
	pub uploads: Arc<UploadRegistry>
}
