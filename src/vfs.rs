//! sdmmc-mount - File access on a mounted volume
//!
//! Once a card is mounted, its files are reached through whatever file API
//! the platform exposes under the mount point. [`Vfs`] is the handful of
//! calls the demo needs from it.

use core::fmt::Debug;

/// How a file is opened.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Read from the start. The file must exist.
    Read,
    /// Create the file, or truncate it if it exists, and write from the start.
    WriteTruncate,
}

/// POSIX style file access by absolute path.
pub trait Vfs {
    /// The errors the file API can return. Must be debug formattable.
    type Error: Debug;
    /// An open file.
    type File;

    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File, Self::Error>;

    /// Shorthand for [`Vfs::open`] with [`Mode::WriteTruncate`].
    fn create(&mut self, path: &str) -> Result<Self::File, Self::Error> {
        self.open(path, Mode::WriteTruncate)
    }

    /// Write `data`, returning how many bytes were written.
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read into `buf`, returning how many bytes were read. Zero means end of
    /// file.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Flush and close.
    fn close(&mut self, file: Self::File) -> Result<(), Self::Error>;

    fn exists(&mut self, path: &str) -> bool;

    fn remove(&mut self, path: &str) -> Result<(), Self::Error>;

    /// Fails if `to` already exists.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error>;
}

impl<T> Vfs for &mut T
where
    T: Vfs,
{
    type Error = T::Error;
    type File = T::File;

    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File, Self::Error> {
        (*self).open(path, mode)
    }

    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, Self::Error> {
        (*self).write(file, data)
    }

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (*self).read(file, buf)
    }

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error> {
        (*self).close(file)
    }

    fn exists(&mut self, path: &str) -> bool {
        (*self).exists(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        (*self).remove(path)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error> {
        (*self).rename(from, to)
    }
}

#[cfg(feature = "std")]
pub use self::std_vfs::StdVfs;

#[cfg(feature = "std")]
mod std_vfs {
    use std::fs::{self, File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::path::PathBuf;

    use super::{Mode, Vfs};

    /// [`Vfs`] over `std::fs`.
    ///
    /// On a target where the volume really is mounted at its mount point,
    /// use [`StdVfs::new`]. On a development host, [`StdVfs::rooted`] maps
    /// every absolute path below a directory instead.
    #[derive(Debug, Default, Clone)]
    pub struct StdVfs {
        root: Option<PathBuf>,
    }

    impl StdVfs {
        pub fn new() -> Self {
            StdVfs { root: None }
        }

        pub fn rooted(root: impl Into<PathBuf>) -> Self {
            StdVfs {
                root: Some(root.into()),
            }
        }

        fn resolve(&self, path: &str) -> PathBuf {
            match &self.root {
                Some(root) => root.join(path.trim_start_matches('/')),
                None => PathBuf::from(path),
            }
        }
    }

    impl Vfs for StdVfs {
        type Error = io::Error;
        type File = File;

        fn open(&mut self, path: &str, mode: Mode) -> io::Result<File> {
            let path = self.resolve(path);
            match mode {
                Mode::Read => File::open(path),
                Mode::WriteTruncate => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(path)
                }
            }
        }

        fn write(&mut self, file: &mut File, data: &[u8]) -> io::Result<usize> {
            file.write(data)
        }

        fn read(&mut self, file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
            file.read(buf)
        }

        fn close(&mut self, mut file: File) -> io::Result<()> {
            file.flush()?;
            file.sync_all()
        }

        fn exists(&mut self, path: &str) -> bool {
            self.resolve(path).exists()
        }

        fn remove(&mut self, path: &str) -> io::Result<()> {
            fs::remove_file(self.resolve(path))
        }

        fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
            let to = self.resolve(to);
            if to.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "rename target exists",
                ));
            }
            fs::rename(self.resolve(from), to)
        }
    }

}
