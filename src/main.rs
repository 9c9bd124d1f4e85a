use bytes::Bytes;
use clap::Parser;
use paxos_kv::{PaxosOptions, PaxosStoreConfig, ReadInput, ReplicaEndpoint, SqliteConnector, WriteInput};
use slog::Drain;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Write or read one version of a key on a set of SQLite replicas.
#[derive(Parser, Debug)]
#[command(name = "paxos-kv")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// File listing one replica per line, as `path` or `id=path`
    replica_list: PathBuf,

    key: String,

    /// Version to write. Must be one more than the latest learned version.
    #[arg(requires = "value")]
    version: Option<i64>,

    value: Option<String>,

    /// Log debug events to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let code = {
        let logger = create_root_logger_for_stderr(args.verbose);
        let outcome = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(run(args, logger)),
            Err(e) => Err(format!("Failed to start runtime: {}", e).into()),
        };
        if let Err(e) = &outcome {
            eprintln!("error: {}", e);
        }
        exit_code(&outcome)
    };

    // Logger is dropped by now, so the async drain has flushed.
    process::exit(code);
}

/// 0 only when the operation finished with status `ok`. Everything else, startup failures
/// included, is 1.
fn exit_code(outcome: &Result<bool, Box<dyn Error>>) -> i32 {
    match outcome {
        Ok(true) => 0,
        Ok(false) | Err(_) => 1,
    }
}

/// Returns whether the operation finished with status `ok`.
async fn run(args: Args, logger: slog::Logger) -> Result<bool, Box<dyn Error>> {
    let replicas = ReplicaEndpoint::load_list(&args.replica_list)?;
    let store = paxos_kv::try_create_paxos_store(PaxosStoreConfig {
        replicas,
        connector: Arc::new(SqliteConnector::new()),
        info_logger: logger,
        options: PaxosOptions::default(),
    })?;

    let key = Bytes::from(args.key);
    let status = match (args.version, args.value) {
        (Some(version), Some(value)) => {
            let input = WriteInput {
                key,
                version,
                value: Bytes::from(value),
            };
            match store.write(input).await {
                Ok(output) => print_write_output(&output),
                Err(e) => print_write_error(&e),
            }
        }
        _ => match store.read(ReadInput { key }).await {
            Ok(output) => {
                println!(
                    "status: {}\nversion: {}\nvalue: {}\nreplicas: {}",
                    output.status(),
                    output.version,
                    String::from_utf8_lossy(&output.value),
                    output.replicas
                );
                output.status()
            }
            Err(e) => {
                println!("status: {}", e.status());
                if let paxos_kv::ReadError::NoQuorum { obtained, .. } = e {
                    println!("replicas: {}", obtained);
                }
                e.status()
            }
        },
    };

    Ok(status == "ok")
}

fn print_write_output(output: &paxos_kv::WriteOutput) -> &'static str {
    println!("status: {}", output.status());
    match output {
        paxos_kv::WriteOutput::Ok { version, nodes } => println!("version: {}\nnodes: {}", version, nodes),
        paxos_kv::WriteOutput::Resolved { version, value, nodes } => println!(
            "version: {}\nvalue: {}\nnodes: {}",
            version,
            String::from_utf8_lossy(value),
            nodes
        ),
    }
    output.status()
}

fn print_write_error(e: &paxos_kv::WriteError) -> &'static str {
    println!("status: {}", e.status());
    match e {
        paxos_kv::WriteError::InvalidVersion { existing_max } => println!("version: {}", existing_max),
        paxos_kv::WriteError::AlreadyLearned { version, value } => {
            println!("version: {}\nvalue: {}", version, String::from_utf8_lossy(value))
        }
        paxos_kv::WriteError::NoPromiseQuorum { obtained, .. }
        | paxos_kv::WriteError::NoAcceptQuorum { obtained, .. }
        | paxos_kv::WriteError::NoLearnQuorum { obtained, .. } => println!("nodes: {}", obtained),
        paxos_kv::WriteError::InvalidInput(reason) => eprintln!("{}", reason),
    }
    e.status()
}

fn create_root_logger_for_stderr(verbose: bool) -> slog::Logger {
    let level = if verbose { slog::Level::Debug } else { slog::Level::Warning };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_exits_with_zero() {
        assert_eq!(exit_code(&Ok(true)), 0);
        assert_eq!(exit_code(&Ok(false)), 1);
        assert_eq!(exit_code(&Err("Failed to start runtime".into())), 1);
    }
}
