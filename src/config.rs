//! Daemon configuration, parsed from the command line.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Sensor-side file inspection pipeline for IDS-extracted files.
#[derive(Parser, Debug, Clone)]
#[command(name = "nightwatch", version, about)]
pub struct Config {
    /// Filestore layout version (1 or 2)
    #[arg(long = "storeversion", default_value_t = 2)]
    pub store_version: u8,

    /// Path for the fileinfo input socket
    #[arg(long = "socket", default_value = "/tmp/files.sock")]
    pub socket: PathBuf,

    /// Directory where the IDS stores extracted files
    #[arg(long = "dir", default_value = "/var/log/suricata/filestore")]
    pub file_dir: PathBuf,

    /// Directory for the verdict database
    #[arg(long = "data", default_value = "/var/lib/nightwatch")]
    pub data_dir: PathBuf,

    /// Endpoint and port for the AMQP connection
    #[arg(long = "amqpuri", default_value = "localhost:5672")]
    pub amqp_uri: String,

    /// Exchange to post verdicts to
    #[arg(long = "amqpexch", default_value = "nightwatch")]
    pub amqp_exchange: String,

    /// User name for the AMQP connection
    #[arg(long = "amqpuser", default_value = "sensor")]
    pub amqp_user: String,

    /// Password for the AMQP connection
    #[arg(long = "amqppass", default_value = "sensor")]
    pub amqp_pass: String,

    /// Log verdicts instead of submitting them to the message bus
    #[arg(long = "dummy")]
    pub dummy: bool,

    /// Endpoint for suspicious file S3 upload; uploading is disabled when
    /// unset
    #[arg(long = "upload-endpoint")]
    pub upload_endpoint: Option<String>,

    /// Access key for S3 upload
    #[arg(long = "upload-access-key", default_value = "")]
    pub upload_access_key: String,

    /// Secret access key for S3 upload
    #[arg(long = "upload-secret-access-key", default_value = "")]
    pub upload_secret_access_key: String,

    /// Bucket name for S3 upload
    #[arg(long = "upload-bucket", default_value = "")]
    pub upload_bucket: String,

    /// Region for S3 upload
    #[arg(long = "upload-region", default_value = "")]
    pub upload_region: String,

    /// Scratch directory backing the S3 upload queue
    #[arg(long = "upload-scratch-dir", default_value = "/tmp/nightwatch_scratch")]
    pub upload_scratch_dir: PathBuf,

    /// Use SSL for S3 upload
    #[arg(long = "upload-ssl")]
    pub upload_ssl: bool,

    /// Max age of a file before it is cleaned up
    #[arg(long = "maxage", value_parser = humantime::parse_duration, default_value = "365days")]
    pub max_age: Duration,

    /// Max total space used for files, in MiB
    #[arg(long = "maxspace", default_value_t = 20_000)]
    pub max_space: u64,

    /// Rescan files whose cached verdict is older than this
    #[arg(long = "rescantime", value_parser = humantime::parse_duration, default_value = "72h")]
    pub rescan_time: Duration,

    /// Path of a local rule file for the signature scanner
    #[arg(long = "rule-file")]
    pub rule_file: Option<PathBuf>,

    /// Download URL for signature rules, used when no rule file is given
    #[arg(long = "rule-uri", default_value = "http://localhost/rules/current.json")]
    pub rule_uri: String,

    /// Rule data is XZ compressed
    #[arg(long = "rule-xz")]
    pub rule_xz: bool,

    /// Verbose output
    #[arg(long = "verbose")]
    pub verbose: bool,

    /// JSON log output
    #[arg(long = "logjson")]
    pub log_json: bool,
}
