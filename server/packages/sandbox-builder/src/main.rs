fn main() {
    if let Err(err) = sandbox_builder::cli::run_sandbox_builder() {
        tracing::error!(error = %err, "sandbox-builder failed");
        std::process::exit(1);
    }
}
