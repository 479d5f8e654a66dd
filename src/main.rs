mod debug_report;
mod demo;

use chrono::NaiveDate;
use fieldsmith::{Options, build_schema_default};
use std::io::{self, IsTerminal};

const DEFAULT_REFERENCE: &str = "2024-06-30";
const DEFAULT_CUSTOMERS: usize = 400;

fn main() {
    env_logger::init();
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let demo = match demo::demo(config.customers, config.options.seed, config.reference) {
        Ok(demo) => demo,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    let candidates = demo.request.rules.len();
    match build_schema_default(demo.request, &demo.sampler, &config.options) {
        Ok(result) => {
            let run = debug_report::Run { customers: config.customers, orders: demo.orders, candidates };
            debug_report::print_run(&run, &config.options, &result, config.color);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

struct CliConfig {
    options: Options,
    customers: usize,
    reference: NaiveDate,
    color: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut options = Options::default();
    let mut customers = DEFAULT_CUSTOMERS;
    let mut reference = parse_reference(DEFAULT_REFERENCE)?;
    let mut color = io::stdout().is_terminal();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, String> {
            match &inline {
                Some(value) => Ok(value.clone()),
                None => args.next().ok_or_else(|| format!("error: {name} expects a value")),
            }
        };

        match flag.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("fieldsmith {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--mode" => match value("--mode")?.as_str() {
                "standard" => {
                    options.rule_optimization = false;
                    options.sparse_optimization = false;
                }
                "optimized" => {
                    options.rule_optimization = true;
                    options.sparse_optimization = false;
                }
                "sparse" => {
                    options.rule_optimization = true;
                    options.sparse_optimization = true;
                }
                other => {
                    return Err(format!("error: unknown mode '{other}' (expected standard, optimized or sparse)"));
                }
            },
            "--min-block-size" => {
                options.sparse_block_min_size = parse_number("--min-block-size", &value("--min-block-size")?)?;
            }
            "--max-fields" => {
                options.max_constructed_fields = Some(parse_number("--max-fields", &value("--max-fields")?)?);
            }
            "--indexed-names" => options.interpretable_names = false,
            "--no-regularization" => options.construction_regularization = false,
            "--target" => options.target_field = Some(value("--target")?),
            "--seed" => options.seed = parse_number("--seed", &value("--seed")?)?,
            "--customers" => customers = parse_number("--customers", &value("--customers")?)?,
            "--reference" => reference = parse_reference(&value("--reference")?)?,
            _ => return Err(format!("error: unknown option '{arg}'\n\n{}", help_text())),
        }
    }

    if customers == 0 {
        return Err("error: --customers must be at least 1".to_string());
    }
    Ok(CliConfig { options, customers, reference, color })
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value.parse().map_err(|_| format!("error: invalid {name} '{value}' (expected a non-negative integer)"))
}

fn parse_reference(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("error: invalid --reference '{value}' (expected YYYY-MM-DD)"))
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "fieldsmith {version}

Builds derived fields for a generated customers/orders demo and reports them.

Usage:
  fieldsmith [OPTIONS]

Options:
  --mode <mode>              standard, optimized or sparse. Default: optimized
  --min-block-size <n>       Smallest actual partition size realized as a block
                             in sparse mode. Default: 0
  --max-fields <n>           Cap on new candidate fields.
  --indexed-names            Name fields ConstructedFeature<N>.
  --no-regularization        Leave every cost at 0.
  --target <field>           Customer field excluded from cost annotation.
  --seed <n>                 Seed of the demo data and tie-breaks. Default: 1
  --customers <n>            Number of generated customers. Default: {default_customers}
  --reference <date>         Most recent order date, YYYY-MM-DD.
                             Default: {default_reference}
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  RUST_LOG=fieldsmith=debug  Trace analysis, ledgers and field creation.

Exit codes:
  0  Success.
  1  Build error.
  2  Invalid arguments.
",
        version = env!("CARGO_PKG_VERSION"),
        default_customers = DEFAULT_CUSTOMERS,
        default_reference = DEFAULT_REFERENCE
    )
}
