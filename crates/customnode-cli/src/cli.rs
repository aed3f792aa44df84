use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "customnode", version, about = "Run the different-ops custom node in-process")]
pub struct Cli {
    /// Log filter (RUST_LOG syntax)
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the input and output descriptors
    Describe,

    /// Execute the node once and print its outputs
    Run {
        /// Comma-separated values for `input_numbers`
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        numbers: Vec<f32>,

        /// Comma-separated factors for `op_factors` (add, subtract, multiply, divide)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        factors: Vec<f32>,

        /// Node parameter as key=value; may be repeated
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "customnode",
            "run",
            "--numbers",
            "2,-10",
            "--factors",
            "1,2,3,4",
            "--param",
            "mode=fast",
        ])
        .unwrap();
        let Command::Run {
            numbers,
            factors,
            params,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(numbers, vec![2.0, -10.0]);
        assert_eq!(factors, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(params, vec![("mode".to_string(), "fast".to_string())]);
        assert_eq!(cli.log, "info");
    }

    #[test]
    fn rejects_param_without_value() {
        assert!(parse_param("mode").is_err());
    }
}
