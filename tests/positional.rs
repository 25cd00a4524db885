use std::fs;
use std::path::PathBuf;

use ch2g4::{
    Channel, ChannelError, MatrixOptions, PositionalOptions, DISABLED_ATT_DB, ISI_SNR_DB,
};
use tempdir::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn options(stream: Option<PathBuf>) -> PositionalOptions {
    PositionalOptions {
        stream,
        ..PositionalOptions::default()
    }
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
}

#[test]
fn set_and_move_drive_the_path_loss() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(
        &td,
        "stream",
        "0 set 0  0 0 0\n0 set 1  1 0 0\n10 move 1  3 0 0 10\n",
    );

    let mut channel = Channel::positional(&options(Some(stream)), 2).unwrap();
    let mut att = [0.0; 2];

    // 1 m, 2 m (halfway through the move), 3 m (arrived)
    for (now, expected) in [(0u64, 39.604), (15, 45.625), (20, 49.147)] {
        let isi = channel.calc(&[false, true], 0, now, &mut att).unwrap();
        assert_eq!(isi, ISI_SNR_DB);
        assert_close(att[1], expected);
    }
}

#[test]
fn disabling_a_device_mutes_its_paths() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(&td, "stream", "0 set 0  0 0 0\n0 set 1  1 0 0\n5 disable 1\n");

    let mut channel = Channel::positional(&options(Some(stream)), 2).unwrap();
    let mut att = [0.0; 2];

    channel.calc(&[false, true], 0, 10, &mut att).unwrap();
    assert_eq!(att[1], DISABLED_ATT_DB);
}

/// Stepping time forward must observe the same values as jumping there in
/// one go with a freshly built channel.
#[test]
fn forward_passes_are_consistent() {
    let td = TempDir::new("ch2g4").unwrap();
    let content = "0 set 0  0 0 0\n0 set 1  1 0 0\n10 move 1  3 0 0 10\n25 disable 0\n";
    let stepped_stream = write(&td, "stepped", content);
    let fresh_stream = write(&td, "fresh", content);

    let mut stepped = Channel::positional(&options(Some(stepped_stream)), 2).unwrap();
    let mut fresh = Channel::positional(&options(Some(fresh_stream)), 2).unwrap();
    let mut att = [0.0; 2];

    let mut stepped_value = 0.0;
    for now in [0u64, 12, 15, 20] {
        stepped.calc(&[false, true], 0, now, &mut att).unwrap();
        stepped_value = att[1];
    }

    fresh.calc(&[false, true], 0, 20, &mut att).unwrap();
    assert_eq!(att[1], stepped_value);
}

#[test]
fn repeated_queries_are_idempotent() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(
        &td,
        "stream",
        "0 set 0  0 0 0\n0 set 1  1 0 0\n10 move 1  3 0 0 10\n",
    );

    let mut channel = Channel::positional(&options(Some(stream)), 2).unwrap();
    let mut att = [0.0; 2];

    channel.calc(&[false, true], 0, 15, &mut att).unwrap();
    let first = att[1];
    channel.calc(&[false, true], 0, 15, &mut att).unwrap();
    assert_eq!(att[1], first);
}

/// A stream that only teleports devices at time zero is indistinguishable
/// from a constant attenuation matrix with the matching path losses.
#[test]
fn static_positions_match_a_constant_matrix() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(&td, "stream", "0 set 0  0 0 0\n0 set 1  10 0 0\n");
    // 10 m of free space at 2.4 GHz
    let matrix = write(&td, "matrix", "0 1 : 59.60422483423212\n1 0 : 59.60422483423212\n");

    let mut positional = Channel::positional(&options(Some(stream)), 2).unwrap();
    let mut constant = Channel::matrix(
        &MatrixOptions {
            matrix_file: Some(matrix),
            ..MatrixOptions::default()
        },
        2,
    )
    .unwrap();

    let mut att_a = [0.0; 2];
    let mut att_b = [0.0; 2];
    for now in [0u64, 500, 1_000_000] {
        positional.calc(&[false, true], 0, now, &mut att_a).unwrap();
        constant.calc(&[false, true], 0, now, &mut att_b).unwrap();
        assert_close(att_a[1], att_b[1]);
    }
}

#[test]
fn devices_without_positions_use_the_default() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(&td, "stream", "0 set 0  0 0 0\n");

    let mut channel = Channel::positional(&options(Some(stream)), 2).unwrap();
    let mut att = [0.0; 2];

    channel.calc(&[false, true], 0, 100, &mut att).unwrap();
    assert_eq!(att[1], 60.0);
}

#[test]
fn no_stream_at_all_works() {
    let mut channel = Channel::positional(&options(None), 3).unwrap();
    let mut att = [0.0; 3];

    channel.calc(&[true, true, false], 2, 0, &mut att).unwrap();
    assert_eq!(att[0], 60.0);
    assert_eq!(att[1], 60.0);
}

#[test]
fn unused_transmitters_are_not_written() {
    let mut channel = Channel::positional(&options(None), 3).unwrap();
    let mut att = [-1.0; 3];

    channel.calc(&[false, true, false], 0, 0, &mut att).unwrap();
    assert_eq!(att, [-1.0, 60.0, -1.0]);
}

#[test]
fn out_of_order_streams_are_corrupt() {
    let td = TempDir::new("ch2g4").unwrap();
    let stream = write(
        &td,
        "stream",
        "0 set 0  0 0 0\n50 set 0  1 0 0\n20 set 0  2 0 0\n",
    );

    let mut channel = Channel::positional(&options(Some(stream)), 1).unwrap();
    let mut att = [0.0; 1];

    channel.calc(&[false], 0, 10, &mut att).unwrap();
    let err = channel.calc(&[false], 0, 60, &mut att).err().unwrap();
    assert!(matches!(err, ChannelError::Corrupt { .. }));
}

#[test]
fn unreadable_stream_fails_to_build() {
    let td = TempDir::new("ch2g4").unwrap();
    let missing = td.path().join("no-such-stream");

    let err = Channel::positional(&options(Some(missing)), 2).err().unwrap();
    assert!(matches!(err, ChannelError::Open { .. }));
}
