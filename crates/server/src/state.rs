use std::path::PathBuf;

use mediaconv_transcoder::service::ConversionService;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub converter: ConversionService,
    pub upload_dir: PathBuf,
}
