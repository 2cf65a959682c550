use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::{FileKind, RecordingLayout};

#[test]
fn test_refresh_creates_both_directories() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let layout = RecordingLayout::new(root.path());

    assert!(layout.refresh_for("2024-01-02")?);
    assert!(root.path().join("2024-01-02/video").is_dir());
    assert!(root.path().join("2024-01-02/picture").is_dir());

    // same date is a no-op
    assert!(!layout.refresh_for("2024-01-02")?);

    // the date rolls over
    assert!(layout.refresh_for("2024-01-03")?);
    assert!(root.path().join("2024-01-03/video").is_dir());
    assert_eq!(layout.today().as_deref(), Some("2024-01-03"));
    Ok(())
}

#[test]
fn test_file_names_are_unique_millis() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let layout = RecordingLayout::new(root.path());

    let mut names = HashSet::new();
    for _ in 0..50 {
        let path = layout.file_path(FileKind::Picture)?;
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert_eq!(
            path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
            Some("picture")
        );
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap()
            .to_string();
        assert!(stem.parse::<i64>().is_ok(), "not millis: {}", stem);
        assert!(names.insert(stem));
    }

    let video = layout.file_path(FileKind::Video)?;
    assert_eq!(video.extension().and_then(|e| e.to_str()), Some("mp4"));
    assert!(video.parent().unwrap().is_dir());
    Ok(())
}

#[test]
fn test_refresh_if_due_is_rate_limited() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let layout = RecordingLayout::new(root.path());
    let now = Instant::now();

    assert!(layout.refresh_if_due(now)?);
    assert!(!layout.refresh_if_due(now + Duration::from_millis(500))?);

    // due again, but the date is unchanged
    let today = layout.today().unwrap();
    assert!(!layout.refresh_if_due(now + Duration::from_secs(2))?);
    assert!(root.path().join(today).join("video").is_dir());
    Ok(())
}

#[test]
fn test_unwritable_root_fails() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let file = root.path().join("plain-file");
    std::fs::write(&file, b"x")?;

    let layout = RecordingLayout::new(&file);
    assert!(layout.refresh_for("2024-01-02").is_err());
    assert!(layout.today().is_none());
    Ok(())
}
