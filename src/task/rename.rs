//! Rename/move the transfer file

use crate::error::Error;
use crate::future::CompletionFuture;
use crate::session::TransferSession;
use crate::task::template::resolve_template;
use crate::task::{Task, TaskArgs, TaskType};
use crate::types::ErrorCode;
use async_trait::async_trait;
use std::sync::Arc;

/// Task renaming the transfer file to the first word of its resolved template
pub struct RenameTask {
    args: TaskArgs,
    session: Arc<TransferSession>,
    future: CompletionFuture,
}

impl RenameTask {
    /// Task for `args` within `session`
    pub fn new(args: TaskArgs, session: Arc<TransferSession>) -> Self {
        Self {
            args,
            session,
            future: CompletionFuture::cancellable(),
        }
    }
}

#[async_trait]
impl Task for RenameTask {
    fn task_type(&self) -> TaskType {
        TaskType::Rename
    }

    fn future(&self) -> &CompletionFuture {
        &self.future
    }

    async fn run(&self) {
        let transfer_id = self.session.record().id().0;
        let resolved = resolve_template(
            &self.args.action_template,
            &self.session,
            &self.args.transfer_args,
        );
        let Some(name) = resolved.split_whitespace().next() else {
            self.future.set_failure(
                Error::system("empty rename target"),
                Some(self.session.result(ErrorCode::Internal)),
            );
            return;
        };

        match self.session.file().replace_filename(name, true).await {
            Ok(()) => {
                let moved_to = self.session.file().true_path().display().to_string();
                tracing::info!(transfer_id, to = %moved_to, "transfer file renamed");
                self.session.record().mark_file_moved(&moved_to, true).await;
                self.future
                    .set_success(Some(self.session.result(ErrorCode::CompleteOk)));
            }
            Err(e) => {
                tracing::error!(transfer_id, target = name, error = %e, "cannot rename transfer file");
                let error = match e {
                    Error::System { .. } => e,
                    other => Error::system(format!("cannot rename to {}: {}", name, other)),
                };
                self.future
                    .set_failure(error, Some(self.session.result(ErrorCode::Internal)));
            }
        }
    }
}
