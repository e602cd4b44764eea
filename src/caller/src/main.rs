//! This crate defines the command line interface for the jvm_cpa analyzer.
//! General documentation about the analyzer is contained in the [`jvm_cpa_lib`] crate.

extern crate jvm_cpa_lib; // Needed for the docstring-link to work

use anyhow::{anyhow, Error};
use jvm_cpa_lib::abstract_domain::{JvmFrameState, PairDomain, ReferenceDomain};
use jvm_cpa_lib::analysis::bam::{BamCpaRun, BamStatistics, Config};
use jvm_cpa_lib::analysis::cfa::{Cfa, ProgramDescription};
use jvm_cpa_lib::analysis::constant_propagation::{
    ConstantPropagation, HeapAwareConstantPropagation,
};
use jvm_cpa_lib::analysis::cpa::Completion;
use jvm_cpa_lib::bytecode::MethodSignature;
use jvm_cpa_lib::utils::log::{print_all_messages, LogThread};
use jvm_cpa_lib::utils::read_config_file;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
/// Run a configurable program analysis on a JVM bytecode program description
struct CmdlineArgs {
    /// The path to the program description file.
    #[structopt(validator(check_file_existence))]
    program: String,

    /// Path to a custom configuration file to use instead of the default configuration.
    #[structopt(long, short, validator(check_file_existence))]
    config: Option<String>,

    /// The method the analysis starts at,
    /// e.g. 'com/example/Main.main([Ljava/lang/String;)V'.
    /// Defaults to the first method of the program description.
    #[structopt(long, short)]
    entry: Option<String>,

    /// Write the results to a file instead of stdout.
    /// This only affects the analysis results. Log messages are still printed to stdout.
    #[structopt(long, short)]
    out: Option<String>,

    /// Generate JSON output.
    #[structopt(long, short)]
    json: bool,

    /// Do not print log messages. This prevents polluting stdout for json output.
    #[structopt(long, short)]
    quiet: bool,

    /// Output the reached states as YAML for debugging purposes.
    /// The current behavior of this flag is unstable and subject to change.
    #[structopt(long, hidden = true)]
    debug: bool,
}

fn main() {
    let cmdline_args = CmdlineArgs::from_args();

    run_analysis(cmdline_args);
}

/// Check the existence of a file
fn check_file_existence(file_path: String) -> Result<(), String> {
    if std::fs::metadata(&file_path)
        .map_err(|err| format!("{}", err))?
        .is_file()
    {
        Ok(())
    } else {
        Err(format!("{} is not a file.", file_path))
    }
}

/// Parse an entry point of the form `class.method(descriptor)` into a method signature.
fn parse_entry_signature(entry: &str) -> Result<MethodSignature, Error> {
    let descriptor_start = entry
        .find('(')
        .ok_or_else(|| anyhow!("Entry point {} has no method descriptor", entry))?;
    let (qualified_name, descriptor) = entry.split_at(descriptor_start);
    let (class, name) = qualified_name
        .rsplit_once('.')
        .ok_or_else(|| anyhow!("Entry point {} has no class name", entry))?;
    Ok(MethodSignature::new(class, name, descriptor))
}

/// Run the analyzer on the given program description.
fn run_analysis(args: CmdlineArgs) {
    let description: ProgramDescription = {
        let file = std::io::BufReader::new(std::fs::File::open(&args.program).unwrap());
        serde_json::from_reader(file).expect("Parsing of the program description failed")
    };

    let config: Config = if let Some(config_path) = &args.config {
        let config_json =
            read_config_file(config_path).expect("Could not read the configuration file");
        serde_json::from_value(config_json).expect("Parsing of the configuration file failed")
    } else {
        Config::default()
    };

    let entry = match &args.entry {
        Some(entry) => parse_entry_signature(entry)
            .unwrap_or_else(|err| panic!("Invalid entry point: {}", err)),
        None => description
            .methods
            .first()
            .map(|method| {
                MethodSignature::new(
                    method.class.clone(),
                    method.name.clone(),
                    method.descriptor.clone(),
                )
            })
            .expect("The program description contains no methods"),
    };

    let (cfa, mut all_logs) =
        Cfa::from_description(description).expect("Building the control flow automaton failed");

    let logging_thread = LogThread::spawn(LogThread::collect_logs);

    // The heap model determines the state type of the analysis,
    // so the two models are dispatched to separate instantiations of the engine.
    // Unsupported heap model values are rejected by `from_config` before the run starts.
    let report = match config.heap_model.as_str() {
        "tree" => {
            let run = BamCpaRun::from_config(HeapAwareConstantPropagation::new(&cfa), &config)
                .unwrap_or_else(|err| panic!("Configuration error: {}", err))
                .with_log_sender(logging_thread.get_msg_sender());
            let initial = run
                .initial_state(&entry, PairDomain(JvmFrameState::new(), ReferenceDomain::new()))
                .unwrap_or_else(|err| panic!("Invalid entry point: {}", err));
            let outcome = run.run(initial);
            if args.debug {
                outcome.print_yaml(&cfa);
            }
            json_report(
                outcome.generate_compact_json(&cfa),
                outcome.completion,
                outcome.statistics,
            )
        }
        _ => {
            let run = BamCpaRun::from_config(ConstantPropagation::new(&cfa), &config)
                .unwrap_or_else(|err| panic!("Configuration error: {}", err))
                .with_log_sender(logging_thread.get_msg_sender());
            let initial = run
                .initial_state(&entry, JvmFrameState::new())
                .unwrap_or_else(|err| panic!("Invalid entry point: {}", err));
            let outcome = run.run(initial);
            if args.debug {
                outcome.print_yaml(&cfa);
            }
            json_report(
                outcome.generate_compact_json(&cfa),
                outcome.completion,
                outcome.statistics,
            )
        }
    };

    all_logs.append(&mut logging_thread.collect());
    if args.quiet {
        all_logs = Vec::new(); // Suppress all log messages since the `--quiet` flag is set.
    }
    print_all_messages(all_logs);

    let output = if args.json {
        serde_json::to_string_pretty(&report).unwrap()
    } else {
        render_text_report(&report)
    };
    if let Some(file_path) = &args.out {
        std::fs::write(file_path, output).unwrap_or_else(|error| {
            panic!("Writing to output path {} failed: {}", file_path, error)
        });
    } else {
        println!("{}", output);
    }
}

/// Bundle the analysis results into one json value.
fn json_report(
    states: serde_json::Value,
    completion: Completion,
    statistics: BamStatistics,
) -> serde_json::Value {
    serde_json::json!({
        "completion": completion,
        "statistics": statistics,
        "states": states,
    })
}

/// Render the json report as human-readable text.
fn render_text_report(report: &serde_json::Value) -> String {
    let mut lines = Vec::new();
    if report["completion"] != serde_json::json!(Completion::Complete) {
        lines.push("Analysis aborted, the results are incomplete.".to_string());
    }
    lines.push(format!("Statistics: {}", report["statistics"]));
    if let Some(states) = report["states"].as_object() {
        for (location, location_states) in states {
            lines.push(format!("{}: {}", location, location_states));
        }
    }
    lines.join("\n") + "\n"
}
