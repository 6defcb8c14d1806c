//! History of generated artifacts.
//!
//! The coordinators never touch history; callers hand completed results to a
//! [`History`] implementation together with the metadata worth keeping.

pub mod item;
pub mod store;

use async_trait::async_trait;

use crate::tensor::{AudioTensor, ImageTensor};

pub use item::{HistoryDetails, HistoryItem, MediaType};
pub use store::{HistoryError, HistoryStore};

/// Sink for completed generation results.
#[async_trait]
pub trait History: Send + Sync {
    async fn add_image(
        &self,
        model: &str,
        image: &ImageTensor,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError>;

    async fn add_audio(
        &self,
        model: &str,
        audio: &AudioTensor,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError>;

    async fn add_text(
        &self,
        model: &str,
        text: &str,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError>;
}
