use std::sync::Arc;

use clap::{Parser as _, command};
use clap_derive::{Parser, Subcommand};
use portal::config::Configuration;
use portal::crypto::PasswordManager;
use portal::database::{
    DEFAULT_CREDENTIALS, DEFAULT_DATABASE_NAME, DEFAULT_POOL_SIZE, Database,
};
use portal::user::{Profile, UserBuilder, UserService};
use rand::{Rng, distributions::Alphanumeric};

const GENERATED_PASSWORD_SIZE: usize = 16;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the `config.yaml` file.
    #[clap(long, short, env = "PORTAL_CONFIG", default_value = "config.yaml")]
    config: String,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Create a staff account with every permission.
    CreateSuperuser {
        #[clap(long, short)]
        email: String,
        /// Generated randomly when omitted.
        #[clap(long, short)]
        password: Option<String>,
        #[clap(long)]
        first_name: Option<String>,
        #[clap(long)]
        last_name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = Configuration::default()
        .path(args.config.into())
        .read()
        .expect("Invalid URL in configuration.");
    let postgres = config
        .postgres
        .clone()
        .expect("Missing `postgres` entry on configuration.");

    let db = Database::new(
        &postgres.address,
        &postgres.username.unwrap_or(DEFAULT_CREDENTIALS.into()),
        &postgres.password.unwrap_or(DEFAULT_CREDENTIALS.into()),
        &postgres.database.unwrap_or(DEFAULT_DATABASE_NAME.into()),
        postgres.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
    )
    .await
    .expect("Cannot connect to PostgreSQL database.");

    let pwd = PasswordManager::new(config.argon2.clone())
        .expect("Invalid Argon2 parameters.");
    let users = UserService::new(Arc::clone(&db.users), Arc::new(pwd));

    match args.cmd {
        Commands::CreateSuperuser {
            email,
            password,
            first_name,
            last_name,
        } => {
            let generated = password.is_none();
            let password = password.unwrap_or_else(|| {
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(GENERATED_PASSWORD_SIZE)
                    .map(char::from)
                    .collect()
            });

            let profile = Profile {
                first_name: first_name.unwrap_or_default(),
                last_name: last_name.unwrap_or_default(),
                ..Default::default()
            };
            let builder = UserBuilder::new()
                .email(&email)
                .password(&password)
                .profile(profile);

            match users.create_superuser(builder).await {
                Ok(user) => {
                    println!("Superuser {:?} has been created with id {}.", user.email, user.id);
                    if generated {
                        println!("Password: {password}");
                    }
                },
                Err(err) => {
                    eprintln!("Superuser was not created: {err}");
                    std::process::exit(1);
                },
            }
        },
    }
}
