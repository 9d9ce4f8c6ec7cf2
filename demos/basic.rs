//! Building shell-like pipelines out of byte streams.
//!
//! Roughly `printf ... | sort | tr a-z A-Z | while read l; do echo "<$l>"; done`.

use procweld::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Basic Pipeline Example ===");

    let fruit = cat!["banana\n", "apple\n", b"cherry\n".to_vec()];

    let shouted = fruit
        .pipe("sort", Vec::<String>::new())
        .pipe("tr", ["a-z", "A-Z"])
        .map_lines(|line| cat!["<", line, ">\n"])
        .text()
        .await?;
    print!("{}", shouted);

    // Anything on stderr fails the stage, whatever the exit status.
    let failed = ByteStream::command("sh", ["-c", "echo 'no such fruit' >&2"])
        .run()
        .await;
    println!("diagnostic stage: {:?}", failed.map_err(|e| e.to_string()));

    println!("Basic pipeline completed!\n");
    Ok(())
}
