use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zippr")]
#[command(version)]
#[command(about = "List, create and extract ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zippr zip backup.zip src docs          archive two directories\n  \
  zippr unzip data1.zip -x joe           extract all files except joe from data1.zip\n  \
  zippr unzip -p foo.zip | more          send contents of foo.zip via pipe into more\n  \
  zippr generate big.bin 5G              create a 5 GiB zero-filled file")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List archive contents
    List(ListArgs),
    /// Create or extend an archive
    Zip(ZipArgs),
    /// Extract an archive
    Unzip(UnzipArgs),
    /// Write a synthetic file of the given size
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// ZIP file path
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct ZipArgs {
    /// Archive to create
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files and directories to add
    #[arg(value_name = "PATHS", required = true)]
    pub paths: Vec<String>,

    /// Append to an existing archive
    #[arg(short = 'a', long)]
    pub append: bool,

    /// Deflate level (0-9)
    #[arg(short = 'l', long, default_value_t = 6)]
    pub level: u32,

    /// Store entries without compression
    #[arg(long)]
    pub store: bool,

    /// Add each path under its base name at the archive root
    #[arg(long)]
    pub cherry_pick: bool,

    /// Remove this leading path from entry names
    #[arg(long, value_name = "PREFIX")]
    pub strip_prefix: Option<String>,

    /// Do not descend into directories
    #[arg(long)]
    pub no_recurse: bool,

    /// Allow several entries with the same name
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Archive the files symlinks point to
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct UnzipArgs {
    /// ZIP file path
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Fail if any file to extract already exists
    #[arg(long, conflicts_with_all = ["overwrite", "never_overwrite"])]
    pub strict: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Do not restore permissions and modification times
    #[arg(long)]
    pub no_metadata: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl UnzipArgs {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// File to write
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Size in bytes, with an optional K/M/G/T suffix
    #[arg(value_name = "SIZE")]
    pub size: String,

    /// Fill with zero bytes (the default)
    #[arg(long, conflicts_with_all = ["pattern", "seed"])]
    pub zeros: bool,

    /// Repeat this text instead of writing zeros
    #[arg(long, value_name = "TEXT", conflicts_with = "seed")]
    pub pattern: Option<String>,

    /// Pseudo-random content from this seed
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,
}
