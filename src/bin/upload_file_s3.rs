use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std_traffic::{
    config::{AwsArgs, AwsConfig},
    logging,
    s3::{upload::DEFAULT_THRESHOLD, upload::MIN_PART_SIZE, upload_file, S3Store, UploadOptions},
};
use tracing::info;

/// Upload one file to an S3 bucket, in parts when it is large.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Object key; empty means the file path
    key: String,

    /// Destination bucket
    bucket: String,

    /// Use a multipart upload when the file exceeds the threshold
    #[arg(long)]
    large: bool,

    /// Multipart cut-over and part size in bytes
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: u64,

    #[arg(long)]
    key_id: Option<String>,

    #[arg(long)]
    secret_key: Option<String>,

    #[arg(long)]
    region: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info,std_traffic=info");
    let args = Args::parse();

    if args.large && args.threshold < MIN_PART_SIZE {
        bail!(
            "--threshold must be at least {} bytes for a multipart upload",
            MIN_PART_SIZE
        );
    }

    let cfg = AwsConfig::from_args(AwsArgs {
        key_id: args.key_id,
        secret_key: args.secret_key,
        region: args.region,
    })?;
    let store = S3Store::connect(&cfg).await;

    let opts = UploadOptions {
        large: args.large,
        threshold: args.threshold,
        ..Default::default()
    };
    let key = (!args.key.is_empty()).then_some(args.key.as_str());
    if !upload_file(&store, &args.bucket, &args.file, key, &opts).await {
        bail!("upload of {} failed", args.file.display());
    }
    info!(bucket = %args.bucket, "done");
    Ok(())
}
