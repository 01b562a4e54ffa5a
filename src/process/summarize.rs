//! The summarize step: fills the summary field from title and description.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::openai::Summarizer;
use crate::model::Video;

use super::{Processor, ProcessorError};

pub struct SummaryProcessor {
    summarizer: Arc<dyn Summarizer>,
}

impl SummaryProcessor {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl Processor for SummaryProcessor {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    fn applicable(&self, video: &Video) -> bool {
        video.summary.is_empty()
    }

    async fn apply(&self, video: &mut Video) -> Result<(), ProcessorError> {
        let summary = self
            .summarizer
            .summarize(&video.title, &video.description)
            .await
            .map_err(|cause| ProcessorError {
                name: self.name(),
                cause,
            })?;
        video.summary = summary;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::openai::MockSummarizer;
    use crate::model::VideoStatus;

    #[tokio::test]
    async fn fills_summary_from_title_and_description() {
        let mock = Arc::new(MockSummarizer::new());
        mock.push_response(Ok("the summary".to_string()));
        let processor = SummaryProcessor::new(mock.clone());

        let mut video = Video::new("yt-1", "UC1");
        video.status = VideoStatus::Fetched;
        video.title = "A Title".to_string();
        video.description = "A description.".to_string();

        assert!(processor.applicable(&video));
        processor.apply(&mut video).await.unwrap();

        assert_eq!(video.summary, "the summary");
        assert!(!processor.applicable(&video));
        assert_eq!(
            mock.calls(),
            vec![("A Title".to_string(), "A description.".to_string())]
        );
    }

    #[tokio::test]
    async fn failure_carries_the_processor_name() {
        let mock = Arc::new(MockSummarizer::new());
        mock.push_response(Err(anyhow::anyhow!("model overloaded")));
        let processor = SummaryProcessor::new(mock);

        let mut video = Video::new("yt-1", "UC1");
        let err = processor.apply(&mut video).await.unwrap_err();
        assert_eq!(err.name, "summarizer");
        assert!(err.to_string().contains("model overloaded"));
        assert!(video.summary.is_empty());
    }
}
