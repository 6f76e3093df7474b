#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, path::Path, path::PathBuf};
use training_driver::{
    config::TrainingConfig,
    run_pipeline,
    trainer::{Stage, TrainingError},
    YoloCli,
};

// Stands in for the framework CLI: records its arguments and writes the
// artifacts the real tool would leave behind.
const FAKE_YOLO: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
for arg in "$@"; do
  case "$arg" in
    project=*) project="${arg#project=}" ;;
    name=*) name="${arg#name=}" ;;
    model=*) model="${arg#model=}" ;;
    format=*) format="${arg#format=}" ;;
  esac
done
case "$2" in
  train) mkdir -p "$project/$name/weights" && touch "$project/$name/weights/best.pt" ;;
  export)
    case "$format" in
      openvino) mkdir -p "${model%.pt}_openvino_model" ;;
      *) touch "${model%.pt}.$format" ;;
    esac ;;
esac
exit 0
"#;

fn install_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("yolo");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config_in(dir: &Path, executable: PathBuf) -> TrainingConfig {
    TrainingConfig {
        project: dir.join("runs"),
        executable: executable.display().to_string(),
        epochs: 3,
        ..TrainingConfig::default()
    }
}

#[test]
fn test_full_run_returns_export_path() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install_script(dir.path(), FAKE_YOLO);
    let config = config_in(dir.path(), executable);

    let exported = run_pipeline(&YoloCli, &config).unwrap();

    assert_eq!(exported, dir.path().join("runs/train/weights/best.onnx"));
    assert!(exported.exists());

    let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap();
    let stages: Vec<&str> = calls
        .lines()
        .map(|line| line.split_whitespace().nth(1).unwrap())
        .collect();
    assert_eq!(stages, vec!["train", "val", "export"]);
    assert!(calls.lines().next().unwrap().contains("epochs=3"));
}

#[test]
fn test_directory_export_returns_model_folder() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install_script(dir.path(), FAKE_YOLO);
    let config = TrainingConfig {
        export_format: "openvino".to_string(),
        ..config_in(dir.path(), executable)
    };

    let exported = run_pipeline(&YoloCli, &config).unwrap();

    assert_eq!(
        exported,
        dir.path().join("runs/train/weights/best_openvino_model")
    );
    assert!(exported.is_dir());
}

#[test]
fn test_failing_training_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install_script(dir.path(), "#!/bin/sh\nexit 2\n");
    let config = config_in(dir.path(), executable);

    let err = run_pipeline(&YoloCli, &config).unwrap_err();

    assert!(matches!(
        err,
        TrainingError::StageFailed {
            stage: Stage::Train,
            ..
        }
    ));
}

#[test]
fn test_missing_weights_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let executable = install_script(dir.path(), "#!/bin/sh\nexit 0\n");
    let config = config_in(dir.path(), executable);

    let err = run_pipeline(&YoloCli, &config).unwrap_err();

    match err {
        TrainingError::MissingArtifact { stage, path } => {
            assert_eq!(stage, Stage::Train);
            assert!(path.ends_with("train/weights/best.pt"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
