use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::OffsetDateTime;

use invoicer_lib::{db, invoices, logging, numbering, pdf, settings, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "invoicer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Consume the next invoice number and print it.
    NextNumber {
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Write an invoice as PDF.
    RenderPdf {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load().context("loading configuration")?;
    logging::init(&config.log_level);

    match cli.command {
        Command::Serve { port, db: db_path } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(path) = db_path {
                config.db_file = path;
            }
            invoicer_lib::run(config).await?;
        }

        Command::NextNumber { db: db_path } => {
            let path = db_path.unwrap_or(config.db_file);
            let mut conn = db::open_connection(&path)
                .with_context(|| format!("opening database {}", path.display()))?;
            let number = numbering::next_invoice_number(&mut conn)?;
            println!("{number}");
        }

        Command::RenderPdf { id, out, db: db_path } => {
            let path = db_path.unwrap_or(config.db_file);
            let conn = db::open_connection(&path)
                .with_context(|| format!("opening database {}", path.display()))?;
            let invoice = invoices::get_invoice(&conn, id, OffsetDateTime::now_utc())?;
            let settings = settings::get_all_settings(&conn)?;
            let bytes = pdf::render_invoice_pdf(&invoice, &settings)?;
            std::fs::write(&out, &bytes)
                .with_context(|| format!("writing {}", out.display()))?;
            eprintln!("wrote {} ({} bytes)", out.display(), bytes.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_port_and_db_overrides() {
        let cli = Cli::try_parse_from(["invoicer", "serve", "--port", "9000", "--db", "x.db"]).unwrap();
        match cli.command {
            Command::Serve { port, db } => {
                assert_eq!(port, Some(9000));
                assert_eq!(db, Some(PathBuf::from("x.db")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["invoicer", "serve"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: None, db: None }));
    }

    #[test]
    fn next_number_takes_an_optional_db() {
        let cli = Cli::try_parse_from(["invoicer", "next-number", "--db", "data/invoices.db"]).unwrap();
        match cli.command {
            Command::NextNumber { db } => assert_eq!(db, Some(PathBuf::from("data/invoices.db"))),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn render_pdf_requires_id_and_out() {
        let cli = Cli::try_parse_from(["invoicer", "render-pdf", "--id", "7", "--out", "inv.pdf"]).unwrap();
        match cli.command {
            Command::RenderPdf { id, out, db } => {
                assert_eq!(id, 7);
                assert_eq!(out, PathBuf::from("inv.pdf"));
                assert_eq!(db, None);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let err = Cli::try_parse_from(["invoicer", "render-pdf", "--out", "inv.pdf"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from(["invoicer", "render-pdf", "--id", "seven", "--out", "x.pdf"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_bad_ports_and_unknown_commands() {
        let err = Cli::try_parse_from(["invoicer", "serve", "--port", "70000"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let err = Cli::try_parse_from(["invoicer", "export"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);

        let err = Cli::try_parse_from(["invoicer"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand);
    }
}
