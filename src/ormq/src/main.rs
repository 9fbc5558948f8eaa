#[macro_use]
extern crate log;
use env_logger::Env;
extern crate clap;
use clap::{App, Arg, ArgMatches};

use common::catalog::{Catalog, DomainModel};
use common::execution::CommandExecutor;
use common::{Field, OrmError};
use memstore::MemoryStore;
use queryexe::{EngineConfig, EntityResolver, Expr, IdentityMap, ParameterContext, QueryEngine, Value};
use sqlgen::dom::SqlStatement;
use sqlgen::{render_statement, translator_from_name};

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

mod csv_utils;

/// Entry point for the query tool.
///
/// Reads a domain model and a query expression, prints the plan and SQL the
/// query compiles to, and optionally runs it against csv data.
fn main() {
    // Configure log environment
    env_logger::from_env(Env::default().default_filter_or("info")).init();

    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Sets a custom engine config file")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("model")
                .short("m")
                .long("model")
                .value_name("FILE")
                .help("Domain model as JSON")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("query")
                .short("q")
                .long("query")
                .value_name("FILE")
                .help("Query expression as JSON")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dialect")
                .short("d")
                .long("dialect")
                .value_name("dialect")
                .help("Target dialect, such as postgresql-9.4 or sqlite-3")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("data")
                .long("data")
                .value_name("DIR")
                .help("Directory of <table>.csv files to load")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("store")
                .long("store")
                .value_name("DIR")
                .default_value("")
                .help("Path where tables are persisted; empty to keep them in memory")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("params")
                .short("p")
                .long("params")
                .value_name("FILE")
                .help("Query variable values as JSON")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("run")
                .short("r")
                .long("run")
                .help("Runs the query and prints the results"),
        )
        .arg(
            Arg::with_name("ddl")
                .long("ddl")
                .help("Prints the schema statements of the model"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Prints the explanation as JSON"),
        )
        .get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), OrmError> {
    let mut config = match matches.value_of("config") {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dialect) = matches.value_of("dialect") {
        config.dialect = dialect.to_string();
    }
    info!("Starting ormq... {:?}", config);

    let model_path = matches
        .value_of("model")
        .ok_or_else(|| OrmError::ValidationError(String::from("No model given")))?;
    let model: DomainModel = serde_json::from_str(&fs::read_to_string(model_path)?)?;
    let model = Arc::new(model);

    if matches.is_present("ddl") {
        print_schema(model.as_ref(), &config.dialect)?;
    }
    let query_path = match matches.value_of("query") {
        Some(path) => path,
        None => return Ok(()),
    };
    let expr: Expr = serde_json::from_str(&fs::read_to_string(query_path)?)?;

    let store_path = matches.value_of("store").unwrap_or("");
    let store = Arc::new(MemoryStore::new(store_path)?);
    store.create_schema(model.as_ref())?;
    if let Some(dir) = matches.value_of("data") {
        load_data(model.as_ref(), dir, &store)?;
    }

    let executor: Arc<dyn CommandExecutor> = store.clone();
    let engine = QueryEngine::new(model, executor, config)?;
    let explanation = engine.explain(&expr)?;
    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else {
        print!("{}", explanation);
    }

    if matches.is_present("run") {
        let params = match matches.value_of("params") {
            Some(path) => parse_params(&fs::read_to_string(path)?)?,
            None => ParameterContext::new(),
        };
        let session: Arc<dyn EntityResolver> = Arc::new(IdentityMap::new());
        let result = engine.execute(&expr, &params, &session)?;
        let rows = print_result(&result)?;
        info!("{} rows", rows);
    }
    if !store_path.is_empty() {
        store.shutdown()?;
    }
    Ok(())
}

/// Prints the create statements of every table and index in the model.
fn print_schema(model: &DomainModel, dialect: &str) -> Result<(), OrmError> {
    let translator = translator_from_name(dialect)?;
    for type_info in model.get_types() {
        for statement in SqlStatement::create_schema(type_info) {
            println!("{};", render_statement(&statement, translator.as_ref())?.text);
        }
    }
    Ok(())
}

/// Loads `<dir>/<table>.csv` into every table that has such a file.
fn load_data(model: &DomainModel, dir: &str, store: &MemoryStore) -> Result<(), OrmError> {
    for type_info in model.get_types() {
        let path = Path::new(dir).join(format!("{}.csv", type_info.table));
        if path.exists() {
            csv_utils::import_csv(type_info, &path.to_string_lossy(), store)?;
        } else {
            debug!("No data for {} at {:?}", type_info.table, path);
        }
    }
    Ok(())
}

/// Reads variable values from a JSON object mapping names to fields.
fn parse_params(text: &str) -> Result<ParameterContext, OrmError> {
    let values: HashMap<String, Field> = serde_json::from_str(text)?;
    Ok(values
        .into_iter()
        .fold(ParameterContext::new(), |params, (name, value)| params.with(&name, value)))
}

/// Prints a result, enumerating nested sequences and groups. Returns the number of top level rows.
fn print_result(result: &Value) -> Result<usize, OrmError> {
    match result {
        Value::List(values) => {
            for value in values {
                print_value(value, 0)?;
            }
            Ok(values.len())
        }
        other => {
            print_value(other, 0)?;
            Ok(1)
        }
    }
}

fn print_value(value: &Value, depth: usize) -> Result<(), OrmError> {
    let indent = "  ".repeat(depth);
    println!("{}{}", indent, value);
    match value {
        Value::Group { elements, .. } | Value::Sequence(elements) => {
            for element in elements.to_vec()? {
                print_value(&element, depth + 1)?;
            }
        }
        Value::Record(members) => {
            for (name, member) in members {
                if let Value::Sequence(elements) = member {
                    println!("{}  {}:", indent, name);
                    for element in elements.to_vec()? {
                        print_value(&element, depth + 2)?;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(r#"{"name": {"StringField": "Ann"}, "n": {"IntField": 2}}"#).unwrap();
        assert_eq!(params.get("name"), Some(&string("Ann")));
        assert_eq!(params.get("n"), Some(&int(2)));
        assert!(parse_params("[1, 2]").is_err());
    }

    #[test]
    fn test_demo_files() {
        init();
        let model: DomainModel =
            serde_json::from_str(include_str!("../demos/school.json")).unwrap();
        let expr: Expr = serde_json::from_str(include_str!("../demos/all_male.json")).unwrap();
        let store = Arc::new(MemoryStore::new_test_store());
        store.create_schema(&model).unwrap();
        let teacher = model.get_type("Teacher").unwrap();
        let rows = csv_utils::read_rows(teacher, include_str!("../demos/data/Teacher.csv").as_bytes()).unwrap();
        store.insert_tuples("Teacher", rows).unwrap();
        let executor: Arc<dyn CommandExecutor> = store;
        let engine = QueryEngine::new(Arc::new(model), executor, EngineConfig::default()).unwrap();
        let session: Arc<dyn EntityResolver> = Arc::new(IdentityMap::new());
        let result = engine.execute(&expr, &ParameterContext::new(), &session).unwrap();
        assert_eq!(result.as_field(), Some(&Field::BoolField(false)));
    }
}
