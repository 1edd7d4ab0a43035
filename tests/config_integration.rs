//! Configuration loading from files and environment variables.

use shape_exercises::config::{AppConfig, Shape};
use shape_exercises::mesh::MeshData;
use serial_test::serial;

fn set_env(key: &str, value: &str) {
    // tests touching the environment are #[serial]
    unsafe { std::env::set_var(key, value) }
}

fn remove_env(key: &str) {
    unsafe { std::env::remove_var(key) }
}

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "shape_exercises_{}_{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
#[serial]
fn test_shipped_defaults() {
    remove_env("SHAPES_SCENE__SHAPE");
    let config = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config")).unwrap();
    assert_eq!(config.window.title, "From Scratch");
    assert_eq!(config.scene.shape, Shape::Circle);
    assert_eq!(config.scene.circle.segments, 10);

    let mesh = MeshData::from_scene(&config.scene).unwrap();
    assert_eq!(mesh.vertices.len(), 11);
}

#[test]
#[serial]
fn test_env_override() {
    set_env("SHAPES_SCENE__SHAPE", "triangle");
    set_env("SHAPES_WINDOW__TITLE", "Test From Env");
    let config = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config"));
    remove_env("SHAPES_SCENE__SHAPE");
    remove_env("SHAPES_WINDOW__TITLE");

    let config = config.unwrap();
    assert_eq!(config.scene.shape, Shape::Triangle);
    assert_eq!(config.window.title, "Test From Env");
}

#[test]
#[serial]
fn test_user_file_overrides_default_file() {
    let dir = scratch_dir("user_override");
    std::fs::write(
        dir.join("default.toml"),
        "[scene.circle]\nsegments = 10\nradius = 0.5\n",
    )
    .unwrap();
    std::fs::write(dir.join("user.toml"), "[scene.circle]\nsegments = 48\n").unwrap();

    let config = AppConfig::load_from(&dir).unwrap();
    assert_eq!(config.scene.circle.segments, 48);
    assert_eq!(config.scene.circle.radius, 0.5);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_missing_directory_gives_defaults() {
    let config = AppConfig::load_from("no/such/config/dir").unwrap();
    assert_eq!(config.window.width, 800);
    assert!(config.rendering.depth_test);
}

#[test]
#[serial]
fn test_bad_value_is_reported() {
    set_env("SHAPES_SCENE__CIRCLE__SEGMENTS", "many");
    let result = AppConfig::load_from("no/such/config/dir");
    remove_env("SHAPES_SCENE__CIRCLE__SEGMENTS");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}
