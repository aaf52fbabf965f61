// Purpose: Provide the binary entry for the Joy-to-C compiler CLI.
// Inputs/Outputs: Reads process args and returns the CLI dispatcher's exit code.
// Invariants: Main must not bypass centralized CLI argument/diagnostic handling.
// Gotchas: Logging is opt-in via env_logger; diagnostics go to stderr regardless.

fn main() {
    env_logger::init();
    let code = joyc::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
