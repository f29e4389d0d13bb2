use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use admission_core::{
    AudioIo, ConversationLog, IntentClassifier, ListenParams, Resolver, ResolverConfig,
    RuleKeywordTable, SpeakConfig, SttBackend,
};
use admission_model::TfidfLogisticModel;

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];
const FAREWELL: &str =
    "Thank you for using the Admission Assistant. Good luck with your application!";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SttBackendArg {
    Primary,
    Offline,
}

impl SttBackendArg {
    fn into_backend(self) -> SttBackend {
        match self {
            Self::Primary => SttBackend::Primary,
            Self::Offline => SttBackend::Offline,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "admission-assistant")]
#[command(about = "Admission FAQ assistant with rule, classifier and keyword fallback stages")]
struct Cli {
    /// Use spoken interaction instead of typed text.
    #[arg(long)]
    voice: bool,

    /// Speech-to-text backend preference for voice mode.
    #[arg(long, value_enum, default_value_t = SttBackendArg::Primary)]
    stt_backend: SttBackendArg,

    /// Seconds to wait for speech before a listen attempt gives up.
    #[arg(long, default_value_t = 5.0)]
    listen_timeout: f32,

    /// Maximum seconds of speech captured per phrase.
    #[arg(long, default_value_t = 8.0)]
    phrase_time_limit: f32,

    /// Extra listen attempts after a failed one.
    #[arg(long, default_value_t = 2)]
    listen_retries: u32,

    /// Text-to-speech rate in words per minute.
    #[arg(long, default_value_t = 170)]
    tts_rate: u16,

    /// Text-to-speech volume in [0.0, 1.0].
    #[arg(long, default_value_t = 1.0)]
    tts_volume: f32,

    /// Voice selector passed through to the synthesis backend.
    #[arg(long)]
    tts_voice: Option<String>,

    /// Ask the synthesis backend for slow speech.
    #[arg(long)]
    tts_slow: bool,

    /// Do not write the conversation log at session end.
    #[arg(long)]
    no_log: bool,

    #[arg(long, default_value = "data/faq.csv")]
    faq_csv: PathBuf,

    #[arg(long, default_value = "data/faq.json")]
    faq_json: PathBuf,

    #[arg(long, default_value = "data/rule_keywords.yaml")]
    rules: PathBuf,

    #[arg(long, default_value = "model/intent_model.json")]
    model: PathBuf,

    #[arg(long, default_value = "conversation_log.json")]
    log_file: PathBuf,

    #[arg(long, default_value_t = admission_core::MIN_CONFIDENCE)]
    min_confidence: f32,

    #[arg(long, default_value_t = admission_core::SUGGESTION_GAP)]
    suggestion_gap: f32,

    /// Answer a single query and exit instead of starting a session.
    #[arg(long)]
    query: Option<String>,
}

/// Console stand-in for the audio collaborator: `listen` reads a typed line,
/// `speak` prints. Failures yield `None` / are swallowed, like the real thing.
struct ConsoleAudio;

impl AudioIo for ConsoleAudio {
    fn listen(&mut self, params: &ListenParams) -> Option<String> {
        for attempt in 0..=params.retries {
            tracing::debug!(
                attempt,
                backend = ?params.backend,
                timeout = params.timeout_secs,
                phrase_limit = params.phrase_time_limit_secs,
                "listen attempt"
            );
            print!("(voice) You: ");
            if io::stdout().flush().is_err() {
                return None;
            }
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    let heard = line.trim().to_string();
                    if !heard.is_empty() {
                        return Some(heard);
                    }
                }
                Err(err) => {
                    tracing::warn!("listen attempt failed: {err}");
                }
            }
        }
        None
    }

    fn speak(&mut self, text: &str, config: &SpeakConfig) {
        tracing::debug!(
            rate = config.rate,
            volume = config.volume,
            slow = config.slow,
            voice = config.voice_selector.as_deref().unwrap_or("default"),
            "speaking response"
        );
        println!("Assistant (spoken): {text}");
    }
}

fn build_resolver(cli: &Cli) -> Resolver {
    let records = match admission_store::load_faq_records(&cli.faq_csv, &cli.faq_json) {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!("FAQ source unavailable, continuing with reduced capability: {err}");
            Vec::new()
        }
    };

    let rules = match admission_store::load_rule_table_or_default(&cli.rules) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::warn!("rule table unreadable, using built-in defaults: {err}");
            RuleKeywordTable::default()
        }
    };

    let classifier = if cli.model.exists() {
        match TfidfLogisticModel::load(&cli.model) {
            Ok(model) => {
                tracing::debug!(
                    labels = model.labels().len(),
                    backend = model.metadata().backend.as_deref().unwrap_or("unknown"),
                    "intent classifier loaded"
                );
                Some(Box::new(model) as Box<dyn IntentClassifier + Send + Sync>)
            }
            Err(err) => {
                tracing::warn!("classifier artifact failed to load, using fallback mode: {err}");
                None
            }
        }
    } else {
        tracing::warn!(
            "no classifier artifact at {}, using fallback mode",
            cli.model.display()
        );
        None
    };

    let config = ResolverConfig {
        min_confidence: cli.min_confidence,
        suggestion_gap: cli.suggestion_gap,
        ..ResolverConfig::default()
    };
    Resolver::new(records, rules, classifier, config)
}

fn print_banner(resolver: &Resolver) {
    println!("Admission Assistant");
    println!("===================");
    println!("Hello! I'm here to help with your admission queries.");
    if resolver.catalog().is_empty() {
        println!("(Running without an FAQ catalog; answers will be generic.)");
    } else {
        println!("You can ask about:");
        for category in resolver.catalog().categories() {
            println!("  - {}", category.replace('_', " "));
        }
    }
    println!("Type 'exit' to quit.");
    println!();
}

fn read_typed_input() -> Option<String> {
    print!("You: ");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        Err(err) => {
            tracing::warn!("failed to read input: {err}");
            None
        }
    }
}

fn is_exit_word(input: &str) -> bool {
    let lowered = input.trim().to_lowercase();
    EXIT_WORDS.contains(&lowered.as_str())
}

fn flush_log(cli: &Cli, log: &ConversationLog) {
    if cli.no_log || log.is_empty() {
        return;
    }
    match admission_store::save_conversation_log(&cli.log_file, log) {
        Ok(()) => println!("Conversation log saved to {}", cli.log_file.display()),
        Err(err) => tracing::warn!("could not persist conversation log: {err}"),
    }
}

fn run_session(cli: &Cli, resolver: &Resolver) -> ConversationLog {
    let mut log = ConversationLog::new();
    let mut audio = ConsoleAudio;
    let listen_params = ListenParams {
        timeout_secs: cli.listen_timeout,
        phrase_time_limit_secs: cli.phrase_time_limit,
        backend: cli.stt_backend.into_backend(),
        retries: cli.listen_retries,
    };
    let speak_config = SpeakConfig {
        rate: cli.tts_rate,
        volume: cli.tts_volume,
        voice_selector: cli.tts_voice.clone(),
        slow: cli.tts_slow,
    };

    print_banner(resolver);

    loop {
        let input = if cli.voice {
            match audio.listen(&listen_params) {
                Some(heard) => heard,
                None => {
                    tracing::warn!("no speech captured, ending session");
                    break;
                }
            }
        } else {
            match read_typed_input() {
                Some(line) => line,
                None => break,
            }
        };

        if is_exit_word(&input) {
            break;
        }

        let resolution = resolver.process_query(&mut log, &input);
        tracing::debug!(
            state = %resolution.state,
            intent = resolution.intent.as_deref().unwrap_or("-"),
            confidence = resolution.confidence.unwrap_or(f32::NAN),
            "query resolved"
        );
        println!("Assistant: {}", resolution.response);
        if cli.voice {
            audio.speak(&resolution.response, &speak_config);
        }
        println!();
    }

    println!("Assistant: {FAREWELL}");
    log
}

fn run_one_shot(cli: &Cli, resolver: &Resolver, query: &str) -> ConversationLog {
    let mut log = ConversationLog::new();
    let resolution = resolver.process_query(&mut log, query);
    println!("{}", resolution.response);
    log
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let resolver = build_resolver(&cli);

    let log = match &cli.query {
        Some(query) => run_one_shot(&cli, &resolver, query),
        None => run_session(&cli, &resolver),
    };
    flush_log(&cli, &log);
    Ok(())
}
