use crate::{
    card::CardError,
    config::{HostConfig, MountConfig, SlotConfig},
    controller::{Controller, Error, ErrorKind},
    handle::MAX_DRIVES,
    host::FsMountError,
    mbr::PartitionType,
    sim::{snapshot, SimBoard, SimCard, SimError, SimStep},
    BlockCount, BlockIdx, CardRegisters, MOUNT_POINT,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn host() -> HostConfig {
    HostConfig::default()
}

fn slot() -> SlotConfig {
    SlotConfig::four_bit_with_pullups()
}

/// Nothing reserved in the controller, nothing left up on the board.
macro_rules! assert_released {
    ($controller:expr, $board:expr) => {{
        assert_eq!($controller.free_drives(), MAX_DRIVES);
        assert_eq!($controller.mounted_cards(), 0);
        assert_eq!($board.registered_drives(), 0);
        assert!(!$board.is_host_up());
        assert!($board.mount_points().is_empty());
    }};
}

#[test]
fn mount_then_unmount_releases_everything() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);

    let card = controller
        .mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    assert_eq!(
        board.calls(),
        [
            SimStep::HostInit,
            SimStep::SlotInit,
            SimStep::CardInit,
            SimStep::Register,
            SimStep::Mount
        ]
    );
    assert_eq!(controller.free_drives(), MAX_DRIVES - 1);
    assert_eq!(controller.mount_path(&card), Some(MOUNT_POINT));
    assert_eq!(card.drive().number(), 0);
    let info = controller.card(&card).unwrap();
    assert_eq!(info.name(), "SIMSD");
    assert_eq!(info.capacity(), BlockCount(8192));
    assert_eq!(board.mount_points(), [MOUNT_POINT]);

    controller.unmount(card).unwrap();
    assert_released!(controller, board);
}

#[test]
fn format_runs_its_steps_in_order() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);
    let card = controller
        .mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    board.clear_calls();

    let card = controller
        .format(Some(card), MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    assert_eq!(
        board.calls(),
        [
            SimStep::Unmount,
            SimStep::Unregister,
            SimStep::HostDeinit,
            SimStep::HostInit,
            SimStep::SlotInit,
            SimStep::CardInit,
            SimStep::Register,
            SimStep::Mount,
            SimStep::Partition,
            SimStep::Format,
            SimStep::Mount,
        ]
    );
    assert_eq!(controller.mounted_cards(), 1);
    assert_eq!(board.with_card(|card| card.cluster_size()).unwrap(), Some(16384));
    controller.unmount(card).unwrap();
}

#[test]
fn format_leaves_one_partition_over_the_whole_card() {
    init_log();
    let board = SimBoard::new(SimCard::blank(16384));
    let mut controller = Controller::new(&board, &board);
    let card = controller
        .format(None, MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();

    let (partitions, blocks) = board
        .with_card(|card| (card.partitions().unwrap(), card.num_blocks()))
        .unwrap();
    let first = partitions[0].unwrap();
    assert_eq!(first.ty, PartitionType::Fat32Lba);
    assert_eq!(first.lba_start, BlockIdx(SimCard::PARTITION_ALIGN));
    assert_eq!(first.end(), BlockIdx(blocks.0));
    assert!(partitions[1..].iter().all(|p| p.is_none()));
    controller.unmount(card).unwrap();
}

#[test]
fn formatting_twice_leaves_an_empty_root() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);
    let card = controller
        .format(None, MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    board.put_file("/sdcard/keep.txt", b"data");
    assert_eq!(snapshot(&board).len(), 1);

    let card = controller
        .format(Some(card), MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    assert!(snapshot(&board).is_empty());
    assert_eq!(controller.mounted_cards(), 1);
    controller.unmount(card).unwrap();
    assert_released!(controller, board);
}

#[test]
fn blank_card_is_not_formatted_by_default() {
    init_log();
    let board = SimBoard::new(SimCard::blank(8192));
    let mut controller = Controller::new(&board, &board);
    let result = controller.mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default());
    assert_eq!(
        result.err(),
        Some(Error::MountFailure(FsMountError::NoFilesystem))
    );
    assert_released!(controller, board);
    assert!(!board.with_card(|card| card.has_filesystem()).unwrap());
}

#[test]
fn blank_card_is_formatted_on_request() {
    init_log();
    let board = SimBoard::new(SimCard::blank(8192));
    let mut controller = Controller::new(&board, &board);
    let config = MountConfig::default().with_format_if_mount_failed(true);
    let card = controller
        .mount(MOUNT_POINT, &host(), &slot(), &config)
        .unwrap();
    assert_eq!(board.with_card(|card| card.cluster_size()).unwrap(), Some(16384));
    assert_eq!(board.mount_points(), [MOUNT_POINT]);
    controller.unmount(card).unwrap();
    assert_released!(controller, board);
}

#[test]
fn floating_lines_are_a_card_init_failure() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192).needing_pullups());
    let mut controller = Controller::new(&board, &board);

    let err = controller
        .mount(MOUNT_POINT, &host(), &SlotConfig::default(), &MountConfig::default())
        .unwrap_err();
    assert_eq!(err, Error::CardInitFailure(SimError::Timeout));
    assert!(err.is_card_init());
    assert_released!(controller, board);

    let card = controller
        .mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    controller.unmount(card).unwrap();
}

#[test]
fn empty_slot_is_a_card_init_failure() {
    init_log();
    let board = SimBoard::empty();
    let mut controller = Controller::new(&board, &board);
    let err = controller
        .format(None, MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap_err();
    assert_eq!(err, Error::CardInitFailure(SimError::NoCard));
    assert_released!(controller, board);
}

#[test]
fn unreadable_csd_is_rejected() {
    init_log();
    let card = SimCard::formatted(8192);
    let mut registers: CardRegisters = *card.registers();
    registers.csd[0] = 0xC0;
    let board = SimBoard::new(card.with_registers(registers));
    let mut controller = Controller::new(&board, &board);
    let err = controller
        .mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnsupportedCard(CardError::UnsupportedCsdVersion(3))
    );
    assert_released!(controller, board);
}

#[test]
fn failing_format_step_releases_everything() {
    init_log();
    let steps = [
        (SimStep::HostInit, ErrorKind::CardInitFailure),
        (SimStep::SlotInit, ErrorKind::CardInitFailure),
        (SimStep::CardInit, ErrorKind::CardInitFailure),
        (SimStep::Register, ErrorKind::Filesystem),
        (SimStep::Mount, ErrorKind::MountFailure),
        (SimStep::Partition, ErrorKind::PartitionFailure),
        (SimStep::Format, ErrorKind::FormatFailure),
    ];
    for (step, kind) in steps.iter() {
        let board = SimBoard::new(SimCard::blank(8192));
        board.fail_on(*step);
        let mut controller = Controller::new(&board, &board);
        let err = controller
            .format(None, MOUNT_POINT, &host(), &slot(), &MountConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), *kind, "failing at {:?}", step);
        assert_released!(controller, board);
    }
}

#[test]
fn drives_run_out() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller: Controller<_, _, 3> = Controller::with_card_table(&board, &board);
    let config = MountConfig::default();
    let a = controller.mount("/a", &host(), &slot(), &config).unwrap();
    let b = controller.mount("/b", &host(), &slot(), &config).unwrap();
    assert_eq!(a.drive().number(), 0);
    assert_eq!(b.drive().number(), 1);

    let err = controller.mount("/c", &host(), &slot(), &config).unwrap_err();
    assert_eq!(err, Error::ResourceExhausted);
    assert_eq!(controller.mounted_cards(), 2);
    assert!(board.is_host_up());

    controller.unmount(a).unwrap();
    assert!(board.is_host_up(), "host stays up while /b is mounted");
    assert!(controller.unmount_at("/b").unwrap());
    assert!(!controller.unmount_at("/b").unwrap());
    assert_released!(controller, board);
}

#[test]
fn full_card_table_is_out_of_memory() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);
    let card = controller
        .mount("/a", &host(), &slot(), &MountConfig::default())
        .unwrap();
    let err = controller
        .mount("/b", &host(), &slot(), &MountConfig::default())
        .unwrap_err();
    assert_eq!(err, Error::OutOfMemory);
    assert_eq!(controller.free_drives(), MAX_DRIVES - 1);
    controller.unmount(card).unwrap();

    let long = format!("/{}", "x".repeat(crate::SD_PATH_MAX));
    let err = controller
        .mount(&long, &host(), &slot(), &MountConfig::default())
        .unwrap_err();
    assert_eq!(err, Error::OutOfMemory);
    assert_released!(controller, board);
}

#[test]
fn bad_arguments_never_reach_the_card() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller = Controller::new(&board, &board);
    let bad_au = MountConfig {
        allocation_unit_size: 1000,
        ..Default::default()
    };
    assert_eq!(
        controller
            .mount("sdcard", &host(), &slot(), &MountConfig::default())
            .unwrap_err(),
        Error::InvalidPath
    );
    assert_eq!(
        controller
            .format(None, MOUNT_POINT, &host(), &slot(), &bad_au)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidConfig
    );
    assert!(board.calls().is_empty());
}

#[test]
fn handle_from_another_controller_is_rejected() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut first = Controller::new(&board, &board);
    let mut second = Controller::new(&board, &board);
    let card = first
        .mount(MOUNT_POINT, &host(), &slot(), &MountConfig::default())
        .unwrap();
    assert!(second.card(&card).is_none());
    assert_eq!(second.unmount(card).unwrap_err(), Error::InvalidHandle);
    assert_eq!(first.mounted_cards(), 1);
    assert!(first.unmount_at(MOUNT_POINT).unwrap());
}

#[test]
fn second_mount_at_a_busy_path_is_refused() {
    init_log();
    let board = SimBoard::new(SimCard::formatted(8192));
    let mut controller: Controller<_, _, 2> = Controller::with_card_table(&board, &board);
    let config = MountConfig::default();
    let card = controller
        .mount(MOUNT_POINT, &host(), &slot(), &config)
        .unwrap();
    board.clear_calls();

    let err = controller
        .mount(MOUNT_POINT, &host(), &slot(), &config)
        .unwrap_err();
    assert_eq!(err, Error::AlreadyMounted);
    assert_eq!(err.kind(), ErrorKind::AlreadyMounted);
    assert!(board.calls().is_empty());
    assert_eq!(controller.mounted_cards(), 1);
    assert_eq!(controller.free_drives(), MAX_DRIVES - 1);

    let card = controller
        .format(Some(card), MOUNT_POINT, &host(), &slot(), &config)
        .unwrap();
    assert_eq!(controller.mounted_cards(), 1);
    controller.unmount(card).unwrap();
    assert_released!(controller, board);
}
