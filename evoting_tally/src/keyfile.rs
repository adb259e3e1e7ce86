//! Key files: a big-endian `u32` length followed by one wire record.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use common::error::{Error, ErrorKind::BadKey};
use log::info;
use threshold::keys::{PrivateKeyShare, PublicKey};
use zeroize::Zeroizing;

use crate::wire::WireRecord;

pub const PUBLIC_KEY_FILE: &str = "public.key";
pub const PRIVATE_KEY_FILE: &str = "private.key";

/// Key files are small; anything longer is not one of ours.
const MAX_FRAME: usize = 1 << 20;

fn bad_key(reason: impl Into<String>) -> Error {
    BadKey(reason.into()).into()
}

/// `private.key` for a single authority, `private-<index>.key` otherwise.
pub fn private_share_file_name(index: usize, authorities: usize) -> String {
    if authorities == 1 {
        PRIVATE_KEY_FILE.to_string()
    } else {
        format!("private-{index}.key")
    }
}

fn write_frame<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(bytes.len()).map_err(|_| bad_key("record too large"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

fn read_frame<R: Read>(reader: &mut R) -> Result<Zeroizing<Vec<u8>>, Error> {
    let eof = |e: io::Error| match e.kind() {
        io::ErrorKind::UnexpectedEof => bad_key("truncated key file"),
        _ => e.into(),
    };

    let mut len = [0u8; 4];
    reader.read_exact(&mut len).map_err(eof)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(bad_key(format!("declared length {len} is too large")));
    }

    let mut bytes = Zeroizing::new(vec![0u8; len]);
    reader.read_exact(&mut bytes).map_err(eof)?;

    let mut rest = [0u8; 1];
    if reader.read(&mut rest)? != 0 {
        return Err(bad_key("trailing bytes after the key record"));
    }

    Ok(bytes)
}

fn decode<T: WireRecord>(bytes: &[u8]) -> Result<T, Error> {
    T::from_bytes(bytes).map_err(|e| bad_key(e.to_string()))
}

pub fn write_public_key<W: Write>(writer: &mut W, pk: &PublicKey) -> Result<(), Error> {
    write_frame(writer, &pk.to_bytes())
}

/// Reads and fully validates a public key: a structurally broken file, a
/// group that is not a safe-prime group or a key outside it is [`BadKey`].
pub fn read_public_key<R: Read>(reader: &mut R) -> Result<PublicKey, Error> {
    decode(&read_frame(reader)?)
}

pub fn write_private_key_share<W: Write>(
    writer: &mut W,
    share: &PrivateKeyShare,
) -> Result<(), Error> {
    let bytes = Zeroizing::new(share.to_bytes());
    write_frame(writer, &bytes)
}

pub fn read_private_key_share<R: Read>(reader: &mut R) -> Result<PrivateKeyShare, Error> {
    decode(&read_frame(reader)?)
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

pub fn save_public_key(path: &Path, pk: &PublicKey) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_public_key(&mut writer, pk)
}

pub fn load_public_key(path: &Path) -> Result<PublicKey, Error> {
    read_public_key(&mut BufReader::new(File::open(path)?))
}

pub fn save_private_key_share(path: &Path, share: &PrivateKeyShare) -> Result<(), Error> {
    let mut file = create_private(path)?;
    write_private_key_share(&mut file, share)
}

pub fn load_private_key_share(path: &Path) -> Result<PrivateKeyShare, Error> {
    read_private_key_share(&mut File::open(path)?)
}

/// Writes `public.key` and one private share file per authority into `dir`,
/// creating it if needed. Returns the paths written, public key first.
pub fn save_key_files(
    dir: &Path,
    pk: &PublicKey,
    shares: &[PrivateKeyShare],
) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(shares.len() + 1);

    let public = dir.join(PUBLIC_KEY_FILE);
    save_public_key(&public, pk)?;
    written.push(public);

    for share in shares {
        let path = dir.join(private_share_file_name(share.index(), shares.len()));
        save_private_key_share(&path, share)?;
        written.push(path);
    }

    info!("wrote {} key files to {}", written.len(), dir.display());

    Ok(written)
}
