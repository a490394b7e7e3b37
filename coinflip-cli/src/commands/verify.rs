use anyhow::{bail, Result};
use coinflip_core::verify_commitment;

pub fn verify(seed: &str, hash: &str) -> Result<()> {
    match verify_commitment(seed, hash)? {
        Some(side) => {
            println!("Commitment verified");
            println!("Hash: {}", hash.trim());
            println!("Result: {}", side);
            Ok(())
        }
        None => bail!("seed does not hash to {}", hash.trim()),
    }
}
