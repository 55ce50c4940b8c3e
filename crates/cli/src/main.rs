//! Agent Runner CLI - Command-line client for the Agent Runner daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROMPT_PREVIEW_CHARS: usize = 48;

#[derive(Parser)]
#[command(name = "agent-runner-cli")]
#[command(about = "Agent Runner CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "AGENT_RUNNER_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a job for a prompt
    Run {
        prompt: String,

        /// Caller-chosen job id
        #[arg(long)]
        id: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        /// Tool the agent may use (repeatable)
        #[arg(long = "allow-tool")]
        allow_tools: Vec<String>,

        /// Tool the agent must not use (repeatable)
        #[arg(long = "deny-tool")]
        deny_tools: Vec<String>,

        /// Extra directory the agent may access (repeatable)
        #[arg(long = "add-dir")]
        add_dirs: Vec<String>,

        #[arg(long)]
        working_dir: Option<String>,
    },

    /// Start one job per prompt
    Batch {
        #[arg(required = true)]
        prompts: Vec<String>,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show one job
    Get { job_id: String },

    /// List jobs, newest first
    List {
        /// pending | running | terminating | completed | failed | terminated
        #[arg(long)]
        status: Option<String>,

        /// Only jobs started at or after this epoch-ms
        #[arg(long)]
        since: Option<i64>,

        /// Only jobs started at or before this epoch-ms
        #[arg(long)]
        before: Option<i64>,
    },

    /// Print a job's output
    Output {
        job_id: String,

        /// Only chunks newer than this epoch-ms
        #[arg(long, default_value = "0")]
        since: i64,

        /// Keep polling until the job finishes
        #[arg(short, long)]
        follow: bool,
    },

    /// Terminate a running job
    Terminate { job_id: String },

    /// Delete a finished job
    Delete { job_id: String },

    /// Status of several jobs
    BatchStatus {
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Terminate several jobs
    BatchTerminate {
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Count already-finished jobs as successes
        #[arg(long)]
        force: bool,

        /// Re-check that every job reached a terminal state
        #[arg(long)]
        wait: bool,
    },

    /// Delete several jobs
    BatchDelete {
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Terminate running jobs first
        #[arg(long)]
        force: bool,

        /// Confirm the jobs are gone afterwards
        #[arg(long)]
        verify: bool,
    },

    /// Show daemon statistics
    Stats,

    /// Remove old finished jobs now
    Cleanup {
        /// Retention window (daemon default when omitted)
        #[arg(long)]
        retention_ms: Option<i64>,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct CreatedRow {
    job_id: String,
    status: String,
    color: String,
}

#[derive(Tabled)]
struct JobRow {
    id: String,
    status: String,
    started: String,
    prompt: String,
}

#[derive(Tabled)]
struct BatchRow {
    job_id: String,
    ok: String,
    status: String,
    error: String,
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PROMPT_PREVIEW_CHARS).collect();
    if text.chars().count() > PROMPT_PREVIEW_CHARS {
        out.push('…');
    }
    out.replace('\n', " ")
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn colored_status(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "terminated" => status.yellow().to_string(),
        "running" | "terminating" => status.cyan().to_string(),
        _ => status.to_string(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn print_chunks(chunks: &[Value]) {
    for chunk in chunks {
        let text = str_field(chunk, "text").trim_end();
        match str_field(chunk, "type") {
            "stderr" => println!("{}", text.red()),
            "error" => println!("{}", text.red().bold()),
            "system" => println!("{}", text.cyan()),
            _ => println!("{}", text),
        }
    }
}

fn print_batch_report(report: &Value) {
    let rows: Vec<BatchRow> = report["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .map(|r| BatchRow {
                    job_id: str_field(r, "jobId").to_string(),
                    ok: if r["success"].as_bool().unwrap_or(false) {
                        "✓".green().to_string()
                    } else {
                        "✗".red().to_string()
                    },
                    status: colored_status(str_field(r, "status")),
                    error: str_field(r, "error").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    println!("{}", Table::new(rows));
    let summary = &report["summary"];
    println!(
        "  {} {}  {} {}  {} {}",
        "Total:".bold(),
        summary["total"],
        "Succeeded:".bold(),
        summary["succeeded"].to_string().green(),
        "Failed:".bold(),
        summary["failed"].to_string().red()
    );
}

/// Position in a followed stream: newest timestamp printed and how many chunks
/// carrying that timestamp were printed.
///
/// `since` is exclusive and chunks share millisecond stamps, so polls ask for one
/// millisecond earlier and skip the chunks already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FollowCursor {
    timestamp: i64,
    seen_at_timestamp: usize,
}

impl FollowCursor {
    fn starting_after(since: i64) -> Self {
        Self {
            timestamp: since,
            seen_at_timestamp: 0,
        }
    }

    fn query_since(&self) -> i64 {
        if self.seen_at_timestamp == 0 {
            self.timestamp
        } else {
            self.timestamp - 1
        }
    }

    /// Drop chunks printed by earlier polls and move past the rest
    fn advance(&mut self, chunks: Vec<Value>) -> Vec<Value> {
        let already_seen = self.seen_at_timestamp;
        let mut skipped = 0;
        let mut fresh = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let ts = chunk["timestamp"].as_i64().unwrap_or(self.timestamp);
            if ts < self.timestamp {
                continue;
            }
            if ts == self.timestamp && skipped < already_seen {
                skipped += 1;
                continue;
            }

            if ts > self.timestamp {
                self.timestamp = ts;
                self.seen_at_timestamp = 1;
            } else {
                self.seen_at_timestamp += 1;
            }
            fresh.push(chunk);
        }
        fresh
    }
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "failed" | "terminated")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            prompt,
            id,
            model,
            allow_tools,
            deny_tools,
            add_dirs,
            working_dir,
        } => {
            let params = json!({
                "prompt": prompt,
                "id": id,
                "options": {
                    "model": model,
                    "allowedTools": allow_tools,
                    "disallowedTools": deny_tools,
                    "addDirs": add_dirs,
                    "workingDir": working_dir,
                },
            });

            let result = call_rpc(&cli.rpc_url, "jobs.create.v1", params).await?;
            let created: CreatedRow = serde_json::from_value(result)?;

            println!("{}", "✓ Job created".green().bold());
            println!();
            println!("{}", Table::new(vec![created]));
        }

        Commands::Batch { prompts, model } => {
            let params = json!({ "prompts": prompts, "options": { "model": model } });
            let result = call_rpc(&cli.rpc_url, "batch.create.v1", params).await?;

            println!(
                "{}",
                format!("✓ {} jobs created", result["count"]).green().bold()
            );
            if let Some(ids) = result["jobIds"].as_array() {
                for id in ids {
                    println!("  {}", id.as_str().unwrap_or_default());
                }
            }
            if let Some(failures) = result["failures"].as_array() {
                for failure in failures {
                    println!(
                        "  {} prompt #{}: {}",
                        "✗".red(),
                        failure["index"],
                        str_field(failure, "error")
                    );
                }
            }
        }

        Commands::Get { job_id } => {
            let job = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "jobId": job_id })).await?;

            println!("{}", format!("Job {}", job_id).cyan().bold());
            println!();
            println!("  {} {}", "Status:".bold(), colored_status(str_field(&job, "status")));
            println!("  {} {}", "Prompt:".bold(), preview(str_field(&job, "prompt")));
            if let Some(started) = job["startedAt"].as_i64() {
                println!("  {} {}", "Started:".bold(), format_millis(started));
            }
            if let Some(finished) = job["finishedAt"].as_i64() {
                println!("  {} {}", "Finished:".bold(), format_millis(finished));
            }
            if let Some(message) = job["completeMessage"].as_str() {
                println!("  {} {}", "Result:".bold(), message);
            }
            let chunks = job["outputHistory"].as_array().map_or(0, Vec::len);
            println!("  {} {}", "Output chunks:".bold(), chunks);
        }

        Commands::List {
            status,
            since,
            before,
        } => {
            let params = json!({ "status": status, "since": since, "before": before });
            let result = call_rpc(&cli.rpc_url, "jobs.list.v1", params).await?;

            let rows: Vec<JobRow> = result["jobs"]
                .as_array()
                .map(|jobs| {
                    jobs.iter()
                        .map(|job| JobRow {
                            id: str_field(job, "id").to_string(),
                            status: colored_status(str_field(job, "status")),
                            started: job["startedAt"]
                                .as_i64()
                                .map(format_millis)
                                .unwrap_or_default(),
                            prompt: preview(str_field(job, "prompt")),
                        })
                        .collect()
                })
                .unwrap_or_default();

            if rows.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Output {
            job_id,
            since,
            follow,
        } => {
            let mut cursor = FollowCursor::starting_after(since);
            loop {
                let params = json!({ "jobId": job_id, "since": cursor.query_since() });
                let view = call_rpc(&cli.rpc_url, "jobs.stream.v1", params).await?;

                let chunks = view["chunks"].as_array().cloned().unwrap_or_default();
                print_chunks(&cursor.advance(chunks));

                if !follow || is_terminal(str_field(&view, "status")) {
                    break;
                }
                tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
            }
        }

        Commands::Terminate { job_id } => {
            let result =
                call_rpc(&cli.rpc_url, "jobs.terminate.v1", json!({ "jobId": job_id })).await?;
            println!(
                "{}",
                format!("✓ Job {} {}", job_id, str_field(&result, "status"))
                    .green()
                    .bold()
            );
        }

        Commands::Delete { job_id } => {
            let result =
                call_rpc(&cli.rpc_url, "jobs.delete.v1", json!({ "jobId": job_id })).await?;
            if result["deleted"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Job {} deleted", job_id).green().bold());
            } else {
                println!("{}", format!("Job {} did not exist", job_id).yellow());
            }
        }

        Commands::BatchStatus { job_ids } => {
            let report =
                call_rpc(&cli.rpc_url, "batch.status.v1", json!({ "jobIds": job_ids })).await?;
            print_batch_report(&report);
        }

        Commands::BatchTerminate {
            job_ids,
            force,
            wait,
        } => {
            let params = json!({ "jobIds": job_ids, "force": force, "wait": wait });
            let report = call_rpc(&cli.rpc_url, "batch.terminate.v1", params).await?;
            print_batch_report(&report);
        }

        Commands::BatchDelete {
            job_ids,
            force,
            verify,
        } => {
            let params = json!({ "jobIds": job_ids, "force": force, "verify": verify });
            let report = call_rpc(&cli.rpc_url, "batch.delete.v1", params).await?;
            print_batch_report(&report);
        }

        Commands::Stats => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!(
                        "  {} {} ({})",
                        "Adapter:".bold(),
                        str_field(&stats, "adapter"),
                        if stats["adapterAvailable"].as_bool().unwrap_or(false) {
                            "available".green()
                        } else {
                            "unavailable".red()
                        }
                    );
                    println!();
                    println!(
                        "  {} {} / {} ({:.1}%)",
                        "Jobs:".bold(),
                        stats["totalJobs"],
                        stats["maxJobs"],
                        stats["usagePercent"].as_f64().unwrap_or(0.0)
                    );
                    if let Some(by_status) = stats["byStatus"].as_object() {
                        for (status, count) in by_status {
                            println!("    {:<12} {}", colored_status(status), count);
                        }
                    }
                    println!("  {} {}", "Active tasks:".bold(), stats["activeTasks"]);
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptimeSeconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Cleanup { retention_ms } => {
            let params = json!({ "retentionMs": retention_ms });
            let result = call_rpc(&cli.rpc_url, "admin.cleanup.v1", params).await?;
            println!(
                "  {} {} jobs removed (retention {} ms)",
                "✓".green(),
                result["removed"],
                result["retentionMs"]
            );
        }
    }

    Ok(())
}
