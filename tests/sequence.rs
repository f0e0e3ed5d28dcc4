use sdmmc_mount::{
    config::MountConfig,
    demo::{self, DemoError, FOO_FILE, GREETING},
    sequence::{self, Outcome, SequenceConfig},
    sim::{SimBoard, SimCard, SimError, SimStep},
    vfs::StdVfs,
    Controller, MOUNT_POINT,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn sequence_on_a_formatted_card() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);
    let report = sequence::run(&mut controller, &mut &board, &SequenceConfig::default());
    assert!(report.all_done(), "{:?}", report);
    assert_eq!(report.line.as_deref(), Some("Hello !"));
    assert_eq!(controller.free_drives(), 2);
    assert!(!board.is_host_up());
}

#[test]
fn sequence_formats_when_asked_to() {
    init_log();
    let board = SimBoard::new(SimCard::blank(8192));
    let mut controller = Controller::new(&board, &board);
    let config = SequenceConfig {
        mount: MountConfig::default().with_format_if_mount_failed(true),
        ..SequenceConfig::default()
    };
    let report = sequence::run(&mut controller, &mut &board, &config);
    assert!(report.all_done(), "{:?}", report);
}

#[test]
fn sequence_without_a_card() {
    init_log();
    let board = SimBoard::empty();
    let mut controller = Controller::new(&board, &board);
    let report = sequence::run(&mut controller, &mut &board, &SequenceConfig::default());
    assert_eq!(report.mount, Outcome::Failed);
    assert_eq!(report.demo, Outcome::Failed);
    assert_eq!(report.format, Outcome::Failed);
    assert_eq!(report.demo_after_format, Outcome::Failed);
    assert_eq!(report.unmount, Outcome::Skipped);
    assert_eq!(report.line, None);
}

#[test]
fn rename_failure_stops_the_demo() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    board.bind_mount(MOUNT_POINT);
    board.fail_on(SimStep::Rename);
    assert_eq!(
        demo::run(&mut &board, MOUNT_POINT),
        Err(DemoError::RenameFailure(SimError::Injected(SimStep::Rename)))
    );
    assert_eq!(board.file("/sdcard/hello.txt").unwrap(), GREETING.as_bytes());
    assert_eq!(board.open_files(), 0);
}

#[test]
fn demo_on_the_host_filesystem() {
    init_log();
    let root = std::env::temp_dir().join(format!("sdmmc-mount-demo-{}", std::process::id()));
    let mut vfs = StdVfs::rooted(&root);
    std::fs::create_dir_all(root.join("sdcard")).unwrap();
    std::fs::write(root.join("sdcard").join(FOO_FILE), "stale contents\nsecond line\n").unwrap();

    let line = demo::run(&mut vfs, MOUNT_POINT).unwrap();
    assert_eq!(line.as_str(), "Hello !");
    assert_eq!(
        std::fs::read_to_string(root.join("sdcard").join(FOO_FILE)).unwrap(),
        GREETING
    );
    assert!(!root.join("sdcard/hello.txt").exists());

    std::fs::remove_dir_all(&root).unwrap();
}
