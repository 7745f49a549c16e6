// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared test scaffolding: a daemon `Router` backed by a fresh temp-dir
//! runtime with mock model/judge backends.

use imgpipe_daemon::fs_store::FsImageStore;
use imgpipe_daemon::{AppState, build_app};
use imgpipe_judge::MockJudgeClient;
use imgpipe_model_mock::MockModelClient;
use imgpipe_runtime::PipelineRuntime;
use std::sync::Arc;
use tempfile::TempDir;

/// Build a fresh app + backing temp directory. The `TempDir` must be kept
/// alive for the duration of the test (dropping it deletes the store root).
pub async fn test_app() -> (axum::Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let images = Arc::new(FsImageStore::new(dir.path().join("images")));
    let runtime = Arc::new(PipelineRuntime::builder(
        dir.path(),
        Arc::new(MockModelClient::new()),
        Arc::new(MockJudgeClient::new()),
        images,
    ).build());
    runtime.hydrate().await.unwrap();

    let state = Arc::new(AppState::new(runtime));
    (build_app(state), dir)
}
