//! Worker side of process-based extraction: task file in, reply file out.

use std::path::{Path, PathBuf};

use forcing_common::variables::distinct_nwm_names;
use forcing_processor::{compute_window, run_extract_worker, CatchmentIndex, ExtractTask, WeightTable};
use serde_json::Value;
use test_utils::{
    assert_approx_eq, small_grid, temp_run_dir, two_catchments, weights_json,
    write_forcing_series, SyntheticForcingFile,
};

fn task_for(files: &[PathBuf]) -> ExtractTask {
    let grid = small_grid();
    let table = WeightTable::from_json_str(&weights_json(&grid, &two_catchments()), "vpu09").unwrap();
    let window = compute_window(&table, &grid).unwrap();
    ExtractTask {
        worker: 3,
        grid,
        index: CatchmentIndex::build(&table, &grid, window).unwrap(),
        variables: distinct_nwm_names().iter().map(|n| n.to_string()).collect(),
        files: files.iter().map(|f| f.display().to_string()).collect(),
        request_timeout_secs: 30,
        verbose: false,
    }
}

async fn run_task(dir: &Path, task: &ExtractTask) -> Value {
    let task_path = dir.join("task.json");
    let reply_path = dir.join("reply.json");
    std::fs::write(&task_path, serde_json::to_vec(task).unwrap()).unwrap();
    run_extract_worker(&task_path, &reply_path).await.unwrap();
    serde_json::from_slice(&std::fs::read(reply_path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_worker_reply_holds_catchment_means() {
    let dir = temp_run_dir();
    let files = write_forcing_series(dir.path(), &small_grid(), 0, 2).unwrap();
    let task = task_for(&files);
    let n_vars = task.variables.len();

    let reply = run_task(dir.path(), &task).await;
    assert_eq!(reply["status"], "done");
    assert!(reply["usage"]["peak_rss_kb"].as_u64().is_some());

    let output = &reply["output"];
    assert_eq!(output["n_catchments"], 2);
    assert_eq!(output["n_variables"], n_vars);
    let blocks = output["values"].as_array().unwrap();
    assert_eq!(blocks.len(), 2);

    // one [catchment, variable] block per file
    for (step, block) in blocks.iter().enumerate() {
        let block = block.as_array().unwrap();
        for (c, catchment) in two_catchments().iter().enumerate() {
            for var in 0..n_vars {
                let value = block[c * n_vars + var].as_f64().unwrap();
                assert_approx_eq!(value, catchment.expected_mean(var, step), 1e-4);
            }
        }
    }
}

#[tokio::test]
async fn test_worker_reply_reports_error_kind() {
    let dir = temp_run_dir();
    let files = write_forcing_series(dir.path(), &small_grid(), 0, 1).unwrap();
    let mut file = SyntheticForcingFile::new(small_grid(), 0);
    file.omit_variable = Some("PSFC");
    file.write(&files[0]).unwrap();

    let reply = run_task(dir.path(), &task_for(&files)).await;
    assert_eq!(reply["status"], "failed");
    assert_eq!(reply["error"]["kind"], "missing_variable");
    assert_eq!(reply["error"]["name"], "PSFC");
}

#[tokio::test]
async fn test_unreadable_task_is_an_error() {
    let dir = temp_run_dir();
    let task_path = dir.path().join("task.json");
    std::fs::write(&task_path, b"{ not json").unwrap();
    assert!(run_extract_worker(&task_path, &dir.path().join("reply.json"))
        .await
        .is_err());
    assert!(!dir.path().join("reply.json").exists());
}
