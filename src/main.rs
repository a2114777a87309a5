//! OptMet CLI - Query structural analogues from a compound catalogue.

use std::path::PathBuf;
use std::time::Instant;

use optmet::{
    compute::{InMemoryCompoundStore, SimilarityEngine},
    schema::{AnalogueSearchConfig, OptMetConfig, ReplacementConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example" => print_example_config(),
        "find-analogs" => find_analogs(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} find-analogs <catalogue.json> <key> [min_similarity] [top_k]",
        program
    );
    eprintln!("       {} --example", program);
    eprintln!();
    eprintln!("Rank structural analogues of a catalogue compound.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  catalogue.json  Path to a compound catalogue snapshot");
    eprintln!("  key             Compound key to search around");
    eprintln!("  min_similarity  Tanimoto threshold (default: 0.75)");
    eprintln!("  top_k           Maximum number of analogues (default: 25)");
    eprintln!();
    eprintln!("Example configurations are printed with the --example flag.");
}

fn find_analogs(args: &[String]) {
    if args.len() < 2 {
        eprintln!("find-analogs needs a catalogue path and a compound key");
        std::process::exit(1);
    }

    let catalogue_path = PathBuf::from(&args[0]);
    let key = &args[1];

    let mut config = AnalogueSearchConfig::default();
    if let Some(min_similarity) = args.get(2).and_then(|s| s.parse().ok()) {
        config.min_similarity = min_similarity;
    }
    if let Some(top_k) = args.get(3).and_then(|s| s.parse().ok()) {
        config.top_k = top_k;
    }

    let store = InMemoryCompoundStore::load(&catalogue_path).unwrap_or_else(|e| {
        eprintln!("Error loading catalogue: {}", e);
        std::process::exit(1);
    });

    println!("Analogue Search");
    println!("===============");
    println!("Catalogue: {} ({} compounds)", catalogue_path.display(), store.len());
    println!("Query: {}", key);
    println!("Scheme: {}", config.fingerprint_scheme);
    println!("Threshold: {}", config.min_similarity);
    println!();

    let start = Instant::now();
    let engine = SimilarityEngine::new(&store);
    let analogues = engine.find_analogues_of(key, &config).unwrap_or_else(|e| {
        eprintln!("Search failed: {}", e);
        std::process::exit(1);
    });

    if analogues.is_empty() {
        println!("No analogues above threshold.");
    }
    for (rank, analogue) in analogues.iter().enumerate() {
        println!("  {:>3}. {:<24} {:.4}", rank + 1, analogue.key, analogue.similarity);
    }

    println!();
    println!(
        "Found {} analogues in {:.3}s",
        analogues.len(),
        start.elapsed().as_secs_f32()
    );
}

fn print_example_config() {
    let optimization = OptMetConfig::default();
    let replacement = ReplacementConfig::default();

    println!("// OptMet run configuration:");
    match serde_json::to_string_pretty(&optimization) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
    println!();
    println!("// Analogue replacement configuration:");
    match serde_json::to_string_pretty(&replacement) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
