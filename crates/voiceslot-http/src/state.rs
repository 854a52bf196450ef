//! Shared application state threaded through every handler via axum's
//! `State` extractor.

use std::sync::Arc;

use crate::bootstrap::AppContext;

pub type AppState = Arc<AppContext>;
