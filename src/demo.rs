//! sdmmc-mount - Filesystem smoke test
//!
//! Writes a greeting to `hello.txt`, renames it over `foo.txt` and reads the
//! first line back. Enough to prove the mounted volume can create, rename,
//! remove and read files.

use core::fmt::Write;

use crate::vfs::{Mode, Vfs};
use crate::SD_PATH_MAX;

#[cfg(feature = "log")]
use log::{error, info};

#[cfg(feature = "defmt-log")]
use defmt::{error, info};

pub const HELLO_FILE: &str = "hello.txt";
pub const FOO_FILE: &str = "foo.txt";
pub const GREETING: &str = "Hello !\n";

/// Size of the line buffer. One byte is kept back, so at most
/// `LINE_MAX - 1` bytes are read.
pub const LINE_MAX: usize = 64;

type FilePath = heapless::String<SD_PATH_MAX>;

/// The line read back, without its newline.
pub type Line = heapless::String<LINE_MAX>;

/// Where the smoke test gave up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoError<E> {
    /// Mount point plus file name does not fit in a path buffer
    PathTooLong,
    OpenFailure(E),
    WriteFailure(E),
    /// The file stopped taking data before the whole greeting was written
    ShortWrite,
    RemoveFailure(E),
    RenameFailure(E),
    ReadFailure(E),
    /// The line read back is not UTF-8
    InvalidUtf8,
}

fn file_path(mount_point: &str, name: &str) -> Option<FilePath> {
    let mut path = FilePath::new();
    write!(path, "{}/{}", mount_point.trim_end_matches('/'), name).ok()?;
    Some(path)
}

/// Run the smoke test against the volume mounted at `mount_point` and return
/// the line read back, which is `"Hello !"` on a healthy card.
pub fn run<V>(vfs: &mut V, mount_point: &str) -> Result<Line, DemoError<V::Error>>
where
    V: Vfs,
{
    let (hello, foo) = match (
        file_path(mount_point, HELLO_FILE),
        file_path(mount_point, FOO_FILE),
    ) {
        (Some(hello), Some(foo)) => (hello, foo),
        _ => {
            error!("Mount point {} is too long", mount_point);
            return Err(DemoError::PathTooLong);
        }
    };

    info!("Opening file {}", hello.as_str());
    let mut file = vfs.create(&hello).map_err(|e| {
        error!("Failed to open file for writing");
        DemoError::OpenFailure(e)
    })?;
    let written = write_all(vfs, &mut file, GREETING.as_bytes());
    let closed = vfs.close(file);
    let written = written.and_then(|n| closed.map(|_| n)).map_err(|e| {
        error!("Failed to write file ({:?})", dbg_fmt!(e));
        DemoError::WriteFailure(e)
    })?;
    if written < GREETING.len() {
        error!(
            "Failed to write file, {} of {} bytes written",
            written,
            GREETING.len()
        );
        return Err(DemoError::ShortWrite);
    }
    info!("File written");

    if vfs.exists(&foo) {
        vfs.remove(&foo).map_err(|e| {
            error!("Failed to remove {} ({:?})", foo.as_str(), dbg_fmt!(e));
            DemoError::RemoveFailure(e)
        })?;
    }

    info!("Renaming file {} to {}", hello.as_str(), foo.as_str());
    vfs.rename(&hello, &foo).map_err(|e| {
        error!("Rename failed");
        DemoError::RenameFailure(e)
    })?;

    info!("Reading file {}", foo.as_str());
    let mut file = vfs.open(&foo, Mode::Read).map_err(|e| {
        error!("Failed to open file for reading");
        DemoError::OpenFailure(e)
    })?;
    let mut buf = [0u8; LINE_MAX];
    let read = read_line(vfs, &mut file, &mut buf);
    let closed = vfs.close(file);
    let len = read.and_then(|len| closed.map(|_| len)).map_err(|e| {
        error!("Failed to read file ({:?})", dbg_fmt!(e));
        DemoError::ReadFailure(e)
    })?;

    let line = &buf[..len];
    let line = match line.iter().position(|b| *b == b'\n') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let line = match core::str::from_utf8(line) {
        Ok(line) => line,
        Err(_) => {
            error!("Read back a line that is not UTF-8");
            return Err(DemoError::InvalidUtf8);
        }
    };
    info!("Read from file: '{}'", line);

    let mut result = Line::new();
    // Shorter than the buffer it came from.
    let _ = result.push_str(line);
    Ok(result)
}

/// Write `data` until it is all out or the file takes no more. Returns the
/// number of bytes written.
fn write_all<V: Vfs>(vfs: &mut V, file: &mut V::File, data: &[u8]) -> Result<usize, V::Error> {
    let mut written = 0;
    while written < data.len() {
        let n = vfs.write(file, &data[written..])?;
        if n == 0 {
            break;
        }
        written += n;
    }
    Ok(written)
}

/// Read up to `LINE_MAX - 1` bytes, stopping after the first newline.
/// Returns the number of bytes in `buf` that belong to the line.
fn read_line<V: Vfs>(
    vfs: &mut V,
    file: &mut V::File,
    buf: &mut [u8; LINE_MAX],
) -> Result<usize, V::Error> {
    let mut len = 0;
    while len < LINE_MAX - 1 {
        let n = vfs.read(file, &mut buf[len..LINE_MAX - 1])?;
        if n == 0 {
            break;
        }
        if let Some(pos) = buf[len..len + n].iter().position(|b| *b == b'\n') {
            return Ok(len + pos + 1);
        }
        len += n;
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBoard, SimCard, SimError, SimFile};

    /// Takes `room` bytes in total, then reports that nothing was written.
    struct FullVolume<'a> {
        board: &'a SimBoard,
        room: usize,
    }

    impl Vfs for FullVolume<'_> {
        type Error = SimError;
        type File = SimFile;

        fn open(&mut self, path: &str, mode: Mode) -> Result<SimFile, SimError> {
            self.board.open(path, mode)
        }

        fn write(&mut self, file: &mut SimFile, data: &[u8]) -> Result<usize, SimError> {
            let n = core::cmp::min(self.room, data.len());
            self.room -= n;
            let mut board = self.board;
            board.write(file, &data[..n])
        }

        fn read(&mut self, file: &mut SimFile, buf: &mut [u8]) -> Result<usize, SimError> {
            let mut board = self.board;
            board.read(file, buf)
        }

        fn close(&mut self, file: SimFile) -> Result<(), SimError> {
            let mut board = self.board;
            board.close(file)
        }

        fn exists(&mut self, path: &str) -> bool {
            let mut board = self.board;
            board.exists(path)
        }

        fn remove(&mut self, path: &str) -> Result<(), SimError> {
            let mut board = self.board;
            board.remove(path)
        }

        fn rename(&mut self, from: &str, to: &str) -> Result<(), SimError> {
            let mut board = self.board;
            board.rename(from, to)
        }
    }

    fn mounted_board() -> SimBoard {
        let board = SimBoard::new(SimCard::formatted(8192));
        board.bind_mount(crate::MOUNT_POINT);
        board
    }

    #[test]
    fn reads_back_the_greeting() {
        let board = mounted_board();
        let line = run(&mut &board, crate::MOUNT_POINT).unwrap();
        assert_eq!(line.as_str(), "Hello !");
        assert_eq!(board.file("/sdcard/foo.txt").unwrap(), GREETING.as_bytes());
        assert!(board.file("/sdcard/hello.txt").is_none());
    }

    #[test]
    fn stale_destination_is_replaced() {
        let board = mounted_board();
        board.put_file("/sdcard/foo.txt", b"left over from last time\n");
        let line = run(&mut &board, crate::MOUNT_POINT).unwrap();
        assert_eq!(line.as_str(), "Hello !");
        assert_eq!(board.file("/sdcard/foo.txt").unwrap(), GREETING.as_bytes());
    }

    #[test]
    fn nothing_mounted_fails_to_open() {
        let board = SimBoard::new(SimCard::formatted(8192));
        assert_eq!(
            run(&mut &board, crate::MOUNT_POINT),
            Err(DemoError::OpenFailure(SimError::NotMounted))
        );
    }

    #[test]
    fn long_lines_are_cut_at_the_buffer() {
        let board = mounted_board();
        board.put_file("/sdcard/long.txt", &[b'x'; 100]);
        let mut vfs = &board;
        let mut file = vfs.open("/sdcard/long.txt", Mode::Read).unwrap();
        let mut buf = [0u8; LINE_MAX];
        assert_eq!(read_line(&mut vfs, &mut file, &mut buf).unwrap(), LINE_MAX - 1);
        vfs.close(file).unwrap();
    }

    #[test]
    fn full_volume_is_a_short_write() {
        let board = mounted_board();
        let mut vfs = FullVolume {
            board: &board,
            room: 3,
        };
        assert_eq!(run(&mut vfs, crate::MOUNT_POINT), Err(DemoError::ShortWrite));
        assert_eq!(board.file("/sdcard/hello.txt").unwrap(), b"Hel");
        assert!(board.file("/sdcard/foo.txt").is_none());
        assert_eq!(board.open_files(), 0);
    }

    #[test]
    fn path_must_fit() {
        let mount_point = core::str::from_utf8(&[b'a'; SD_PATH_MAX]).unwrap();
        let board = mounted_board();
        assert_eq!(
            run(&mut &board, mount_point),
            Err(DemoError::PathTooLong)
        );
    }
}
