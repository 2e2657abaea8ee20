mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gradepipe-cli")]
#[command(about = "Gradepipe CLI - Submit code, poll jobs, and drive grading runs", long_about = None)]
struct Cli {
    /// Gradepipe server base URL
    #[arg(long, global = true, default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file for evaluation against a test-case file
    Submit {
        /// Path to the source file
        #[arg(short, long)]
        file: String,

        /// Language (c, cpp, python, java, javascript)
        #[arg(short, long)]
        language: String,

        /// Path to a JSON file with the test cases
        #[arg(short, long)]
        tests: String,

        /// Exam the submission belongs to
        #[arg(long, default_value = "adhoc")]
        exam: String,

        /// Student the submission belongs to
        #[arg(long, default_value = "cli")]
        student: String,

        /// Schedule ahead of normal jobs
        #[arg(long, default_value = "false")]
        high_priority: bool,

        /// Poll until the job completes
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Show the status document of a job
    Status {
        /// Job id returned by submit
        job_id: String,
    },

    /// Cancel a still-pending job
    Cancel {
        /// Job id returned by submit
        job_id: String,
    },

    /// Show queue depth counters
    Stats,

    /// Enqueue a bulk grading run for an exam
    Grade {
        /// Exam to grade
        #[arg(short, long)]
        exam: String,

        /// Teacher requesting the run
        #[arg(short, long)]
        teacher: String,

        /// Supersede an already-active run
        #[arg(long, default_value = "false")]
        force: bool,

        /// Poll until the task reaches a terminal state
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Show the status document of a grading task
    Task {
        /// Task id returned by grade
        task_id: String,
    },

    /// Request cooperative abort of a grading task
    Stop {
        /// Task id returned by grade
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = commands::ApiClient::new(&cli.server);

    match cli.command {
        Commands::Submit {
            file,
            language,
            tests,
            exam,
            student,
            high_priority,
            wait,
        } => {
            commands::submit(&client, &file, &language, &tests, &exam, &student, high_priority, wait)
                .await?;
        }
        Commands::Status { job_id } => {
            commands::job_status(&client, &job_id).await?;
        }
        Commands::Cancel { job_id } => {
            commands::cancel(&client, &job_id).await?;
        }
        Commands::Stats => {
            commands::stats(&client).await?;
        }
        Commands::Grade {
            exam,
            teacher,
            force,
            wait,
        } => {
            commands::grade(&client, &exam, &teacher, force, wait).await?;
        }
        Commands::Task { task_id } => {
            commands::task_status(&client, &task_id).await?;
        }
        Commands::Stop { task_id } => {
            commands::stop(&client, &task_id).await?;
        }
    }

    Ok(())
}
