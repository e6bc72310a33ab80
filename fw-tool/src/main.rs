//! Sign and verify OTA firmware images

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remoteid_shared::firmware::{self, SignatureDescriptor, DESCRIPTOR_LEN};
use remoteid_shared::keys::SIGNATURE_SCHEME_NOTE;
use remoteid_shared::{PrivateKey, PublicKey};
use tempfile::NamedTempFile;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "sign-fw",
    version,
    about = "Sign and verify Remote ID OTA images",
    after_help = SIGNATURE_SCHEME_NOTE
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a signature descriptor to an image, in place
    Sign {
        ota_file: PathBuf,
        private_keyfile: PathBuf,
        board_id: u32,
    },
    /// Check a signed image against one or more trusted keys
    Verify {
        ota_file: PathBuf,
        #[arg(required = true)]
        public_keyfiles: Vec<PathBuf>,
        /// Board the image must be built for
        #[arg(long)]
        board_id: Option<u32>,
    },
}

/// Sign `ota_file` and replace it atomically. Returns the signed length.
fn sign_file(ota_file: &Path, key_file: &Path, board_id: u32) -> Result<usize> {
    let key = PrivateKey::load(key_file)
        .with_context(|| format!("failed to load private key {}", key_file.display()))?;
    let image = fs::read(ota_file).with_context(|| format!("failed to read {}", ota_file.display()))?;

    let signed = firmware::sign_image(&image, &key, board_id)?;
    info!("Applying signature");

    // Same directory, so the final rename never crosses filesystems
    let dir = ota_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(&signed)
        .with_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.persist(ota_file)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to replace {}", ota_file.display()))?;

    info!("Wrote {}", ota_file.display());
    Ok(signed.len())
}

fn verify_file(ota_file: &Path, key_files: &[PathBuf], board_id: Option<u32>) -> Result<SignatureDescriptor> {
    let keys = key_files
        .iter()
        .map(|path| {
            PublicKey::load(path).with_context(|| format!("failed to load public key {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let image = fs::read(ota_file).with_context(|| format!("failed to read {}", ota_file.display()))?;

    let descriptor = firmware::verify_with_keys(&image, &keys)?;
    if let Some(expected) = board_id {
        firmware::check_board(&descriptor, expected)?;
    }
    Ok(descriptor)
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Sign {
            ota_file,
            private_keyfile,
            board_id,
        } => sign_file(&ota_file, &private_keyfile, board_id).map(|len| {
            info!("Signed image is {} bytes (board {})", len, board_id);
        }),
        Command::Verify {
            ota_file,
            public_keyfiles,
            board_id,
        } => verify_file(&ota_file, &public_keyfiles, board_id).map(|descriptor| {
            info!(
                "Signature OK: board {} length {} (+{} descriptor)",
                descriptor.board_id, descriptor.image_length, DESCRIPTOR_LEN
            );
        }),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use remoteid_shared::firmware::FirmwareError;
    use tempfile::TempDir;

    fn write_keys(dir: &TempDir, seed: u8) -> (PathBuf, PathBuf) {
        let key = PrivateKey::from_bytes(&[seed; 32]);
        let private = dir.path().join(format!("key{}.dat", seed));
        let public = dir.path().join(format!("key{}.pub", seed));
        fs::write(&private, remoteid_shared::keys::encode_key(remoteid_shared::KeyKind::Private, &[seed; 32])).unwrap();
        fs::write(&public, key.public_key().to_text()).unwrap();
        (private, public)
    }

    fn dir_entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sign_then_verify() {
        let dir = TempDir::new().unwrap();
        let (private, public) = write_keys(&dir, 1);
        let ota = dir.path().join("fw.bin");
        fs::write(&ota, vec![0u8; 1024]).unwrap();

        assert_eq!(sign_file(&ota, &private, 5).unwrap(), 1104);
        assert_eq!(fs::read(&ota).unwrap().len(), 1104);
        assert_eq!(dir_entries(&dir), vec!["fw.bin", "key1.dat", "key1.pub"]);

        let descriptor = verify_file(&ota, &[public.clone()], Some(5)).unwrap();
        assert_eq!(descriptor.board_id, 5);
        assert_eq!(descriptor.image_length, 1024);

        let err = verify_file(&ota, &[public], Some(6)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FirmwareError>(),
            Some(FirmwareError::BoardMismatch { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_signing_twice_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let (private, _) = write_keys(&dir, 1);
        let ota = dir.path().join("fw.bin");
        fs::write(&ota, vec![0x55u8; 300]).unwrap();

        sign_file(&ota, &private, 0).unwrap();
        let signed = fs::read(&ota).unwrap();

        let err = sign_file(&ota, &private, 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<FirmwareError>(), Some(FirmwareError::AlreadySigned)));
        assert_eq!(fs::read(&ota).unwrap(), signed);
    }

    #[test]
    fn test_concurrent_signs_in_one_directory() {
        let dir = TempDir::new().unwrap();
        let (private, public) = write_keys(&dir, 1);
        let images: Vec<PathBuf> = (0..4u8)
            .map(|i| {
                let path = dir.path().join(format!("fw{}.bin", i));
                fs::write(&path, vec![i; 4096]).unwrap();
                path
            })
            .collect();

        std::thread::scope(|scope| {
            for (i, path) in images.iter().enumerate() {
                let private = &private;
                scope.spawn(move || sign_file(path, private, i as u32 + 1).unwrap());
            }
        });

        for (i, path) in images.iter().enumerate() {
            let descriptor = verify_file(path, &[public.clone()], Some(i as u32 + 1)).unwrap();
            assert_eq!(descriptor.image_length, 4096);
        }
        assert_eq!(dir_entries(&dir).len(), images.len() + 2);
    }

    #[test]
    fn test_verify_with_any_trusted_key() {
        let dir = TempDir::new().unwrap();
        let (private, public1) = write_keys(&dir, 1);
        let (_, public2) = write_keys(&dir, 2);
        let ota = dir.path().join("fw.bin");
        fs::write(&ota, b"firmware".repeat(20)).unwrap();
        sign_file(&ota, &private, 9).unwrap();

        assert!(verify_file(&ota, &[public2.clone(), public1], None).is_ok());

        let err = verify_file(&ota, &[public2], None).unwrap_err();
        assert!(matches!(err.downcast_ref::<FirmwareError>(), Some(FirmwareError::SignatureInvalid)));
    }

    #[test]
    fn test_bad_private_key_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (_, public) = write_keys(&dir, 1);
        let ota = dir.path().join("fw.bin");
        fs::write(&ota, vec![1u8; 200]).unwrap();

        assert!(sign_file(&ota, &public, 1).is_err());
        assert_eq!(fs::read(&ota).unwrap(), vec![1u8; 200]);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["sign-fw", "sign", "fw.bin", "key.dat", "12"]).unwrap();
        assert!(matches!(cli.command, Command::Sign { board_id: 12, .. }));

        let cli = Cli::try_parse_from(["sign-fw", "verify", "fw.bin", "a.pub", "b.pub", "--board-id", "3"]).unwrap();
        match cli.command {
            Command::Verify {
                public_keyfiles,
                board_id,
                ..
            } => {
                assert_eq!(public_keyfiles.len(), 2);
                assert_eq!(board_id, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Cli::try_parse_from(["sign-fw", "verify", "fw.bin"]).is_err());
    }

    #[test]
    fn test_help_names_signature_scheme() {
        Cli::command().debug_assert();
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("Ed25519"));
        assert!(help.contains("Monocypher"));
    }
}
