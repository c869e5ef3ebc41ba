//! LS-8 Emulator - CLI Entry Point
//!
//! Commands:
//! - `ls8-emu run <program>` - Run a .ls8 or .asm file
//! - `ls8-emu asm <source>` - Assemble to .ls8
//! - `ls8-emu disasm <program>` - Disassemble a .ls8 image
//! - `ls8-emu test` - Run the built-in self-test

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ls8-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the LS-8 8-bit educational computer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the .ls8 or .asm file to execute
        program: String,
        /// Maximum number of instructions to execute (default: 100000)
        #[arg(short, long, default_value = "100000")]
        max_cycles: u64,
        /// Show a per-instruction trace
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(long)]
        dump_state: bool,
    },
    /// Assemble source to a .ls8 image
    Asm {
        /// Path to the source file
        source: String,
        /// Output .ls8 file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a .ls8 image to readable text
    Disasm {
        /// Path to the .ls8 file
        program: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, dump_state }) => {
            run_program(&program, max_cycles, trace, dump_state);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { program }) => {
            disassemble_file(&program);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("LS-8 Emulator v0.1.0");
            println!("An 8-bit educational computer emulator");
            println!();
            println!("Use --help for available commands");
            println!();
            demo_print8();
        }
    }
}

/// Load a byte image from a `.ls8` file, assembling first for `.asm`.
fn load_image(path: &str) -> Vec<u8> {
    use ls8::{assemble, load_program};

    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(image) => {
                println!("📝 Assembled {} bytes", image.len());
                image
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_program(path) {
            Ok(program) => {
                println!("📂 Loaded {} bytes", program.len());
                program.bytes
            }
            Err(e) => {
                eprintln!("❌ Failed to load program: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool, dump_state: bool) {
    use ls8::Cpu;
    use ls8::asm::disasm::disassemble_instruction;

    println!("🔧 Running: {}", path);

    let image = load_image(path);
    if image.is_empty() {
        eprintln!("❌ No bytes to execute");
        std::process::exit(1);
    }

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load(&image) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("━━━ Execution ━━━");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut cycles = 0u64;
    while cpu.is_running() && cycles < max_cycles {
        let pc = cpu.regs.pc;

        match cpu.step(&mut out) {
            Ok(_) => {
                if trace {
                    if let Some(instr) = cpu.last_instruction() {
                        let regs: Vec<String> =
                            cpu.regs.iter().map(|v| format!("{:02X}", v)).collect();
                        println!(
                            "{:02X}: {:<10} | {} | {:?}",
                            pc,
                            disassemble_instruction(&instr),
                            regs.join(" "),
                            cpu.regs.fl
                        );
                    }
                }
                cycles += 1;
            }
            Err(e) => {
                eprintln!("❌ CPU error at PC={:#04x}: {}", pc, e);
                std::process::exit(1);
            }
        }
    }

    println!();
    println!("━━━ Result ━━━");
    println!("Cycles: {}", cycles);
    println!("State: {:?}", cpu.state);
    println!("PC: {:#04x}  SP: {:#04x}  {:?}", cpu.regs.pc, cpu.regs.sp(), cpu.regs.fl);
    let regs: Vec<String> = cpu.regs.iter().map(|v| format!("{:02X}", v)).collect();
    println!("Registers: {}", regs.join(" "));

    if dump_state {
        match serde_json::to_string_pretty(&cpu) {
            Ok(json) => {
                println!();
                println!("{}", json);
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize state: {}", e);
                std::process::exit(1);
            }
        }
    }

    if cycles >= max_cycles && cpu.is_running() {
        println!();
        println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use ls8::assemble;
    use ls8::asm::program::save_bytes;

    let out_path = output.unwrap_or_else(|| source_path.replace(".asm", ".ls8"));

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let image = match assemble(&source) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} bytes", image.len());

    if let Err(e) = save_bytes(&out_path, &image) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(program_path: &str) {
    use ls8::{disassemble, load_program};

    println!("📖 Disassembling: {}", program_path);
    println!();

    let program = match load_program(program_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ Failed to load program: {}", e);
            std::process::exit(1);
        }
    };

    print!("{}", disassemble(&program.bytes));
}

fn demo_print8() {
    use ls8::Cpu;

    println!("━━━ Demo: multiply 8 by 9 and print ━━━");

    let program = [
        0b10000010, 0b00000000, 0b00001000, // LDI R0,8
        0b10000010, 0b00000001, 0b00001001, // LDI R1,9
        0b10100010, 0b00000000, 0b00000001, // MUL R0,R1
        0b01000111, 0b00000000,             // PRN R0
        0b00000001,                         // HLT
    ];

    let mut cpu = Cpu::new();
    cpu.load(&program).unwrap();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cpu.run(&mut out) {
        Ok(executed) => {
            println!("✓ Halted after {} instructions", executed);
        }
        Err(e) => {
            eprintln!("❌ CPU error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_self_test() {
    use ls8::{Cpu, Reg};
    use ls8::cpu::decode::Opcode;
    use ls8::cpu::memory::STACK_TOP;

    println!("━━━ LS-8 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    fn run(image: &[u8]) -> (Cpu, Vec<u8>) {
        let mut cpu = Cpu::new();
        cpu.load(image).unwrap();
        let mut out = Vec::new();
        cpu.run(&mut out).unwrap();
        (cpu, out)
    }

    // Test 1: ADD wrap-around
    print!("ADD wraps to 8 bits (255 + 10 = 9)... ");
    let (cpu, _) = run(&[Opcode::LDI, 0, 255, Opcode::LDI, 1, 10, Opcode::ADD, 0, 1, Opcode::HLT]);
    if cpu.regs.get(Reg::new(0).unwrap()) == 9 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 2: LDI round-trip
    print!("LDI round-trip... ");
    let (cpu, _) = run(&[Opcode::LDI, 3, 123, Opcode::HLT]);
    if cpu.regs.get(Reg::new(3).unwrap()) == 123 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 3: PUSH/POP round-trip
    print!("PUSH/POP restores value and SP... ");
    let (cpu, _) = run(&[
        Opcode::LDI, 2, 5,
        Opcode::PUSH, 2,
        Opcode::LDI, 2, 0,
        Opcode::POP, 2,
        Opcode::HLT,
    ]);
    if cpu.regs.get(Reg::new(2).unwrap()) == 5 && cpu.regs.sp() == STACK_TOP {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 4: CALL/RET
    print!("CALL/RET returns past the call... ");
    let mut image = vec![0u8; 14];
    image[0..3].copy_from_slice(&[Opcode::LDI, 0, 10]);
    image[3..5].copy_from_slice(&[Opcode::CALL, 0]);
    image[5] = Opcode::HLT;
    image[10..13].copy_from_slice(&[Opcode::LDI, 2, 99]);
    image[13] = Opcode::RET;
    let (cpu, _) = run(&image);
    if cpu.is_halted() && cpu.regs.get(Reg::new(2).unwrap()) == 99 && cpu.regs.sp() == STACK_TOP {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 5: CMP/JEQ
    print!("CMP/JEQ takes the branch on equal... ");
    let mut image = vec![0u8; 24];
    image[0..3].copy_from_slice(&[Opcode::LDI, 0, 7]);
    image[3..6].copy_from_slice(&[Opcode::LDI, 1, 7]);
    image[6..9].copy_from_slice(&[Opcode::CMP, 0, 1]);
    image[9..12].copy_from_slice(&[Opcode::LDI, 2, 20]);
    image[12..14].copy_from_slice(&[Opcode::JEQ, 2]);
    image[14..17].copy_from_slice(&[Opcode::LDI, 3, 1]);
    image[17] = Opcode::HLT;
    image[20..23].copy_from_slice(&[Opcode::LDI, 3, 2]);
    image[23] = Opcode::HLT;
    let (cpu, _) = run(&image);
    if cpu.regs.get(Reg::new(3).unwrap()) == 2 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 6: the canonical multiply-and-print program
    print!("print8 program outputs 72... ");
    let (_, out) = run(&[
        Opcode::LDI, 0, 8,
        Opcode::LDI, 1, 9,
        Opcode::MUL, 0, 1,
        Opcode::PRN, 0,
        Opcode::HLT,
    ]);
    if out == b"72\n" {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {:?})", String::from_utf8_lossy(&out));
        failed += 1;
    }

    // Test 7: invalid opcode is a reported error
    print!("Invalid opcode is an error... ");
    let mut cpu = Cpu::new();
    cpu.load(&[0xFF]).unwrap();
    let mut out = Vec::new();
    if cpu.step(&mut out).is_err() {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
