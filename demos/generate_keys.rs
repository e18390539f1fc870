//! Prints a fresh Ed25519 signing key for `JWT_PRIVATE_KEY`.

use auth_service::auth::jwt::JwtKeys;

fn main() {
    let (private_key, public_key) = JwtKeys::generate_key_pair();

    println!("# Add to .env (keep secret):");
    println!("JWT_PRIVATE_KEY={}", private_key);
    println!();
    println!("# Verification key for services that only check access tokens:");
    println!("JWT_PUBLIC_KEY={}", public_key);
}
