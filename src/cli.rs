//! Command-line argument parsing for storewatch

/// Parse command line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    /// Store for `--once`; a random known store when absent
    pub store_id: Option<String>,
    pub validate: bool,
    pub help: bool,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argv-style list; the first element is the program name
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => {
                result.once = true;
                if let Some(next) = args.get(i + 1).filter(|a| !a.starts_with('-')) {
                    result.store_id = Some(next.clone());
                    i += 1;
                }
            }
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("storewatch - store uptime/downtime reports\n");
    println!("USAGE:");
    println!("    storewatch [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once [STORE_ID]       Compute a single report, print it and exit");
    println!("    --validate              Validate configuration and input files, then exit");
    println!("    --help, -h              Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    DATA_DIR                Directory holding the input CSVs (default: ./data)");
    println!("    STORE_STATUS_CSV        Poll observations, relative to DATA_DIR (default: store status.csv)");
    println!("    BUSINESS_HOURS_CSV      Weekly hours (default: Menu hours.csv)");
    println!("    TIMEZONES_CSV           Store timezones (default: bq-results.csv)");
    println!("    REPORT_DIR              Where report CSVs are written (default: ./reports)");
    println!("    HTTP_PORT, BIND_ADDR    Listen address (default: 0.0.0.0:8080)");
    println!("    INGEST_STRICT           Abort on the first malformed row (default: false)");
    println!("    REFERENCE_TIME          latest, now, or an RFC 3339 timestamp (default: latest)");
    println!("    REPORT_TIMEOUT_SECS     Per-report time limit (default: 30)");
}
