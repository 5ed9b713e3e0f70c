//! `cifra-dump` — inspection rapide d'un fichier mmCIF / BinaryCIF
//!
//! Deux modes :
//! - sans `--extract` : recense les blocs et les catégories rencontrées
//!   (via la notification « catégorie inconnue », aucun enregistrement)
//! - avec `--extract` : enregistre la catégorie demandée et imprime chaque
//!   rangée, en texte plat ou en JSON lines

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use cifra_reader::{CategoryHandler, Cell, CellType, CifResult, Reader, Row};

/* ─────────────────────────── CLI (clap) ─────────────────────────── */

#[derive(Debug, Parser)]
#[command(name = "cifra-dump", version, about = "Inspecter un fichier mmCIF/BinaryCIF", long_about = None)]
struct Opt {
    /// Fichier d'entrée (.cif ou .bcif)
    input: PathBuf,

    /// Force le mode binaire (défaut : selon l'extension .bcif)
    #[arg(long = "binary", action = ArgAction::SetTrue)]
    binary: bool,

    /// Force le mode texte
    #[arg(long = "text", action = ArgAction::SetTrue)]
    text: bool,

    /// Catégorie à extraire (ex : `_entry`)
    #[arg(long = "extract")]
    extract: Option<String>,

    /// Mots-clés à extraire, séparés par des virgules
    #[arg(long = "keys", value_delimiter = ',', requires = "extract")]
    keys: Vec<String>,

    /// Sortie JSON lines plutôt que texte plat
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

/* ─────────────────────────── Extraction ─────────────────────────── */

struct Printer {
    keys: Vec<String>,
    json: bool,
    rows: u64,
}

impl CategoryHandler for Printer {
    fn on_row(&mut self, row: &Row<'_>) -> CifResult<()> {
        self.rows += 1;
        if self.json {
            let mut obj = serde_json::Map::new();
            for (i, key) in self.keys.iter().enumerate() {
                let value = match row.at(i) {
                    Cell::Missing | Cell::Omitted | Cell::Unknown => serde_json::Value::Null,
                    Cell::Str(s) => serde_json::Value::from(s),
                    Cell::Int(v) => serde_json::Value::from(v),
                    Cell::Float(v) => serde_json::Value::from(v),
                };
                obj.insert(key.clone(), value);
            }
            println!("{}", serde_json::Value::Object(obj));
        } else {
            let cells: Vec<String> = self
                .keys
                .iter()
                .enumerate()
                .map(|(i, key)| match row.at(i) {
                    Cell::Missing => format!("{key}=<missing>"),
                    Cell::Omitted => format!("{key}=."),
                    Cell::Unknown => format!("{key}=?"),
                    Cell::Str(s) => format!("{key}={s}"),
                    Cell::Int(v) => format!("{key}={v}"),
                    Cell::Float(v) => format!("{key}={v}"),
                })
                .collect();
            println!("{}", cells.join(" "));
        }
        Ok(())
    }

    fn on_finish(&mut self) -> CifResult<()> {
        if !self.json {
            eprintln!("# {} row(s)", self.rows);
        }
        self.rows = 0;
        Ok(())
    }
}

fn run(opt: &Opt) -> Result<()> {
    let file = File::open(&opt.input)
        .with_context(|| format!("cannot open {}", opt.input.display()))?;
    let is_binary = opt.binary
        || (!opt.text
            && opt.input.extension().is_some_and(|e| e.eq_ignore_ascii_case("bcif")));
    let mut reader =
        if is_binary { Reader::binary(file) } else { Reader::text(file) };

    match &opt.extract {
        Some(category) => {
            let keys = if opt.keys.is_empty() {
                anyhow::bail!("--extract requires --keys");
            } else {
                opt.keys.clone()
            };
            let cat = reader.register_category(
                category,
                Box::new(Printer { keys: keys.clone(), json: opt.json, rows: 0 }),
            );
            for key in &keys {
                reader.register_keyword(cat, key, CellType::Str);
            }
            reader.read_all()?;
        }
        None => {
            // recensement : tout est « inconnu », on compte les sites
            let seen: Rc<RefCell<BTreeMap<String, u64>>> =
                Rc::new(RefCell::new(BTreeMap::new()));
            let seen2 = Rc::clone(&seen);
            reader.set_unknown_category_callback(Box::new(move |name, _line| {
                *seen2.borrow_mut().entry(name.to_owned()).or_insert(0) += 1;
            }));
            let mut blocks = 0u64;
            let mut more = true;
            while more {
                more = reader.read_block()?;
                blocks += 1;
            }
            println!("{}: {blocks} block(s)", opt.input.display());
            for (name, sites) in seen.borrow().iter() {
                println!("  {name}  ({sites} site(s))");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    let opt = Opt::parse();
    run(&opt)
}
