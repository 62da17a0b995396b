//! Batch registration and file uploads.

use super::{BatchWorker, Halt, Step};
use crate::types::{BatchStatus, FileStatus};
use tracing::{debug, info, warn};

impl BatchWorker {
    /// Register the batch remotely and upload every file in order
    ///
    /// A file whose upload fails is marked `Failed` and the others carry on.
    /// The batch only fails here when registration fails or no file made it.
    pub(super) async fn upload(&mut self) -> Step<()> {
        self.transition(BatchStatus::Uploading);
        self.checkpoint()?;

        let names: Vec<String> = self
            .batch
            .files
            .iter()
            .map(|f| f.display_name.clone())
            .collect();

        let created = self
            .ctx
            .client
            .create_batch(&names, &self.ctx.options, &self.cancel)
            .await;
        self.checkpoint()?;
        let handle = created.map_err(|e| Halt::step("create batch", &e))?;
        if handle.upload_urls.len() != self.batch.files.len() {
            return Err(Halt::Failed(format!(
                "create batch failed: remote returned {} upload URLs for {} files",
                handle.upload_urls.len(),
                self.batch.files.len()
            )));
        }

        info!(
            batch_id = %self.batch.id,
            remote_id = %handle.remote_id,
            "Batch registered with remote service"
        );
        self.batch.output_dir = Some(self.ctx.output_root.join(&handle.remote_id));
        self.batch.remote_id = Some(handle.remote_id);
        self.emit();

        let mut last_error = None;
        for (index, location) in handle.upload_urls.iter().enumerate() {
            self.checkpoint()?;

            self.batch.files[index].status = FileStatus::Uploading;
            self.emit();

            let path = self.batch.files[index].path.clone();
            let result = self
                .ctx
                .client
                .upload_file(location, &path, &self.cancel)
                .await;
            self.checkpoint()?;

            let file = &mut self.batch.files[index];
            match result {
                Ok(()) => {
                    debug!(batch_id = %self.batch.id, file = %file.display_name, "Uploaded");
                    file.status = FileStatus::Uploaded;
                }
                Err(e) => {
                    warn!(
                        batch_id = %self.batch.id,
                        file = %file.display_name,
                        error = %e,
                        "Upload failed"
                    );
                    file.fail(e.to_string());
                    last_error = Some(e);
                }
            }
            self.emit();
        }

        if self.batch.failure_count() == self.batch.files.len()
            && let Some(e) = last_error
        {
            return Err(Halt::step("upload", &e));
        }

        Ok(())
    }
}
