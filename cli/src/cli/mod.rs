// CLI module
//
// This module contains command-line interface functionality:
// - arguments: Command-line argument parsing and config management subcommands

pub mod arguments;

pub use arguments::SecureProxyArguments;
