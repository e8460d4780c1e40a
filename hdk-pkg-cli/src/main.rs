//! pkgtool: PS3 retail PKG command-line tool
//!
//! Commands:
//!   info <pkg>                        - header, metadata and digest checks
//!   list <pkg>                        - item table
//!   extract <pkg> <out>               - unpack every item below <out>
//!   pack <dir> <out> --content-id ID  - build a package from a directory tree
//!   verify-npd <file>                 - check a standalone NPD header

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use walkdir::WalkDir;

use hdk_pkg::pkg::path::normalize_rel_path;
use hdk_pkg::pkg::{DigestCheck, PkgContentType, PkgDrmType};
use hdk_pkg::{ExtractOptionsBuilder, NpdHeader, PkgArchive, PkgBuilder, RETAIL_KEYS};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pkgtool", version, about = "Inspect, extract and pack PS3 retail PKG files")]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides this)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the header, metadata and digest checks
    Info {
        pkg: PathBuf,
    },

    /// List every item with its flags and size
    List {
        pkg: PathBuf,
    },

    /// Extract every item into a directory
    Extract {
        pkg: PathBuf,
        out: PathBuf,
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
        /// Check NPD headers of protected files against this klicensee (32 hex digits)
        #[arg(long, value_parser = parse_key)]
        klicensee: Option<[u8; 16]>,
    },

    /// Build a package from a directory tree
    Pack {
        dir: PathBuf,
        out: PathBuf,
        /// Content ID stored in the header (max 48 bytes)
        #[arg(long)]
        content_id: String,
        #[arg(long, value_enum, default_value_t = DrmArg::Free)]
        drm_type: DrmArg,
        #[arg(long, value_enum, default_value_t = ContentArg::GameData)]
        content_type: ContentArg,
        /// Install directory name (max 32 bytes)
        #[arg(long)]
        install_dir: Option<String>,
        /// Body IV (32 hex digits)
        #[arg(long, value_parser = parse_key)]
        iv: Option<[u8; 16]>,
    },

    /// Check the NPD header at the start of a file
    #[command(name = "verify-npd")]
    VerifyNpd {
        file: PathBuf,
        /// Name the header was hashed with (default: the file's own name)
        #[arg(long)]
        filename: Option<String>,
        /// Klicensee (32 hex digits, default: the DRM-free klicensee)
        #[arg(long, value_parser = parse_key)]
        klicensee: Option<[u8; 16]>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DrmArg {
    None,
    Network,
    Local,
    Free,
}

impl From<DrmArg> for PkgDrmType {
    fn from(arg: DrmArg) -> Self {
        match arg {
            DrmArg::None => Self::None,
            DrmArg::Network => Self::Network,
            DrmArg::Local => Self::Local,
            DrmArg::Free => Self::Free,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContentArg {
    GameData,
    GameExec,
    Ps1Emu,
    Avatar,
    Theme,
    Widget,
    LicenseFile,
}

impl From<ContentArg> for PkgContentType {
    fn from(arg: ContentArg) -> Self {
        match arg {
            ContentArg::GameData => Self::GameData,
            ContentArg::GameExec => Self::GameExec,
            ContentArg::Ps1Emu => Self::Ps1Emu,
            ContentArg::Avatar => Self::Avatar,
            ContentArg::Theme => Self::Theme,
            ContentArg::Widget => Self::Widget,
            ContentArg::LicenseFile => Self::LicenseFile,
        }
    }
}

fn parse_key(s: &str) -> Result<[u8; 16], String> {
    let bytes = hex::decode(s).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 16 bytes, got {}", b.len()))
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    match cli.command {
        Commands::Info { pkg } => cmd_info(&pkg),
        Commands::List { pkg } => cmd_list(&pkg),
        Commands::Extract {
            pkg,
            out,
            overwrite,
            klicensee,
        } => cmd_extract(&pkg, &out, overwrite, klicensee),
        Commands::Pack {
            dir,
            out,
            content_id,
            drm_type,
            content_type,
            install_dir,
            iv,
        } => {
            let mut builder = PkgBuilder::new()
                .content_id(&content_id)
                .drm_type(drm_type.into())
                .content_type(content_type.into());
            if let Some(dir) = install_dir {
                builder = builder.install_directory(&dir);
            }
            if let Some(iv) = iv {
                builder = builder.iv(iv);
            }
            cmd_pack(builder, &dir, &out)
        }
        Commands::VerifyNpd {
            file,
            filename,
            klicensee,
        } => cmd_verify_npd(&file, filename, klicensee),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_pkg(path: &Path) -> Result<PkgArchive<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    PkgArchive::open(BufReader::new(file)).with_context(|| format!("parsing {}", path.display()))
}

fn check_str(check: DigestCheck) -> String {
    let mark = |ok: bool| if ok { "ok" } else { "BAD" };
    format!(
        "cmac={} sha1={} signature={}",
        mark(check.cmac_valid),
        mark(check.sha1_valid),
        mark(check.signature_valid)
    )
}

// ── Commands ───────────────────────────────────────────────────────────────────

fn cmd_info(path: &Path) -> Result<()> {
    let mut pkg = open_pkg(path)?;
    let header = pkg.header().clone();

    println!("content id:    {}", header.content_id_str());
    println!("items:         {}", header.item_count);
    println!("total size:    {:#x}", header.total_size);
    println!("data:          {:#x} + {:#x}", header.data_offset, header.data_size);
    println!("iv:            {}", hex::encode(header.iv));
    println!("header digest: {}", check_str(pkg.header_digest_check()));
    println!("meta digest:   {}", check_str(pkg.metadata_digest_check()));

    println!("metadata ({} entries):", pkg.metadata().len());
    for entry in pkg.metadata() {
        match entry.kind() {
            Ok(kind) => println!("  {kind:?}: {}", hex::encode(&entry.data)),
            Err(code) => println!("  {code:#x}: {}", hex::encode(&entry.data)),
        }
    }
    if let Some(dir) = pkg.metadata().install_directory() {
        println!("install dir:   {dir}");
    }

    let footer = pkg.verify_footer().context("checking footer")?;
    println!("footer:        {}", if footer { "ok" } else { "BAD" });
    Ok(())
}

fn cmd_list(path: &Path) -> Result<()> {
    let mut pkg = open_pkg(path)?;
    for item in pkg.items() {
        let item = item.context("reading item table")?;
        let kind = if item.entry.is_directory() { 'd' } else { '-' };
        println!(
            "{kind} {:>12} {:#010x} {}",
            item.entry.data_size, item.entry.flags, item.name
        );
    }
    Ok(())
}

fn cmd_extract(
    path: &Path,
    out: &Path,
    overwrite: bool,
    klicensee: Option<[u8; 16]>,
) -> Result<()> {
    let mut pkg = open_pkg(path)?;

    let mut options = ExtractOptionsBuilder::default();
    options.overwrite(overwrite);
    if let Some(klic) = klicensee {
        options.klicensee(klic);
    }
    let options = options.build().context("building extract options")?;

    let items = pkg
        .extract_all(out, &options)
        .with_context(|| format!("extracting to {}", out.display()))?;
    info!(count = items.len(), out = %out.display(), "extraction finished");
    Ok(())
}

fn cmd_pack(mut builder: PkgBuilder, dir: &Path, out: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut count = 0usize;
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let Some(name) = normalize_rel_path(dir, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            builder = builder.add_directory(&name);
        } else if entry.file_type().is_file() {
            builder = builder.add_file_from_path(&name, entry.path());
        } else {
            continue;
        }
        count += 1;
    }

    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    let header = builder
        .write(BufWriter::new(file))
        .with_context(|| format!("writing {}", out.display()))?;

    info!(
        items = count,
        size = header.total_size,
        out = %out.display(),
        "package written"
    );
    Ok(())
}

fn cmd_verify_npd(
    path: &Path,
    filename: Option<String>,
    klicensee: Option<[u8; 16]>,
) -> Result<()> {
    let mut buf = [0u8; NpdHeader::SIZE];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut buf))
        .with_context(|| format!("reading NPD header from {}", path.display()))?;

    let npd = NpdHeader::parse(&buf)?;
    npd.validate()?;

    let filename = match filename {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("path has no file name")?,
    };
    let klicensee = klicensee.unwrap_or(RETAIL_KEYS.npdrm_free_klicensee);

    println!("content id: {}", npd.content_id_str());
    println!("drm type:   {:?}", npd.drm_type_enum());
    println!("app type:   {:?}", npd.app_type_enum());

    if npd.is_header_valid(&RETAIL_KEYS, &klicensee, &filename) {
        println!("NPD header valid for {filename}");
        Ok(())
    } else {
        bail!("NPD header does not match {filename} with the given klicensee");
    }
}
