use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser as ClapParser;
use clap::Subcommand;

use rlox::ast_printer::AstPrinter;
use rlox::error::LoxError;
use rlox::interpreter::Interpreter;
use rlox::parser::Parser;
use rlox::resolver::Resolver;
use rlox::scanner::Scanner;

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Emits the token stream of a source file, one token per line
    Tokenize { filename: PathBuf },

    /// Parses a single expression and prints its canonical form
    Parse { filename: PathBuf },

    /// Parses and evaluates a single expression
    Evaluate { filename: PathBuf },

    /// Parses, resolves and executes a program
    Run { filename: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Cli = match Cli::try_parse() {
        Ok(args) => args,

        Err(e) => {
            let _ = e.print();

            std::process::exit(1);
        }
    };

    match args.commands {
        Commands::Tokenize { filename } => {
            let buf = read_source(&filename)?;

            let scanner: Scanner = Scanner::new(buf);
            let mut tokenized = true;

            for token in scanner {
                match token {
                    Ok(token) => println!("{}", token),

                    Err(e) => {
                        tokenized = false;
                        eprintln!("{}", e);
                    }
                }
            }

            if !tokenized {
                std::process::exit(65);
            }
        }

        Commands::Parse { filename } => {
            let buf = read_source(&filename)?;

            let mut parser: Parser = Parser::new(Scanner::new(buf));

            match parser.parse_expression() {
                Ok(expr) => println!("{}", AstPrinter::print(&expr)),

                Err(e) => fail(e),
            }
        }

        Commands::Evaluate { filename } => {
            let buf = read_source(&filename)?;

            let mut parser: Parser = Parser::new(Scanner::new(buf));

            let expr = parser.parse_expression().unwrap_or_else(|e| fail(e));

            let mut interpreter = Interpreter::new();

            match interpreter.evaluate(&expr) {
                Ok(value) => println!("{}", value),

                Err(e) => fail(e),
            }
        }

        Commands::Run { filename } => {
            let buf = read_source(&filename)?;

            let mut parser: Parser = Parser::new(Scanner::new(buf));

            let statements = parser.parse_program().unwrap_or_else(|e| fail(e));

            let mut resolver = Resolver::new();

            if let Err(e) = resolver.resolve(&statements) {
                fail(e);
            }

            let mut interpreter = Interpreter::new();

            if let Err(e) = interpreter.run(&statements) {
                fail(e);
            }
        }
    }

    Ok(())
}

fn read_source(filename: &Path) -> anyhow::Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    let mut reader: BufReader<File> = BufReader::new(File::open(filename)?);

    reader.read_to_end(&mut buf)?;

    Ok(buf)
}

fn fail(e: LoxError) -> ! {
    eprintln!("{}", e);

    std::process::exit(e.exit_code());
}
