#[cfg(test)]
pub mod fake;
pub mod http;

use std::sync::Arc;

use crate::domain::models::BackendBox;

pub struct BackendManager {}

impl BackendManager {
    pub fn get() -> BackendBox {
        return Arc::<http::HttpBackend>::default();
    }
}
