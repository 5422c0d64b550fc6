use pipeline_migration_tool::cli;
use pipeline_migration_tool::utils::error::format_error;

#[tokio::main]
async fn main() {
    let args = cli::args::parse();
    pipeline_migration_tool::init_logging(args.verbose);
    let verbose = args.verbose > 0;

    // SIGINT during a migration run drops the in-flight child (the runner
    // spawns with `kill_on_drop(true)`) and exits non-zero rather than
    // leaving an orphaned script process behind.
    let outcome = tokio::select! {
        result = pipeline_migration_tool::run(args) => result,
        () = ctrl_c() => {
            tracing::warn!("interrupted; terminating the in-flight migration script");
            std::process::exit(130);
        }
    };

    if let Err(error) = outcome {
        eprint!("{}", format_error(&error, verbose));
        std::process::exit(error.exit_code());
    }
}

async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
}
