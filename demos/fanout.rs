//! Fanning one stream out to several consumers.

use procweld::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Fan-out Example ===");

    let numbers: String = (1..=10).map(|i| format!("{}\n", i)).collect();
    let mut branches = cat![numbers].tee(3);

    let squares = branches.pop().unwrap_or_default().map_lines(|line| {
        let n: u64 = line.parse().unwrap_or_default();
        cat![format!("{}\n", n * n)]
    });
    let count = branches.pop().unwrap_or_default().pipe("wc", ["-l"]);
    let ignored = branches.pop().unwrap_or_default().discard();

    // Branches advance in lockstep, so all of them are read concurrently.
    let (squares, count, ignored) = tokio::join!(squares.text(), count.text(), ignored.wait());

    println!("squares:\n{}", squares?);
    println!("line count: {}", count?.trim());
    println!("discarded branch: {:?}", ignored.map_err(|e| e.to_string()));
    Ok(())
}
