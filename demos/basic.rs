use rpn_asm::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Define variables and functions
    let mut symbols = SymbolTable::new();
    register_builtins(&mut symbols);
    let x = symbols.define_var("x", 2.0);
    let y = symbols.define_var("y", 0.0);
    let max = symbols.fun_id("max").ok_or("max is not registered")?;

    // 2. Emit `y = x > 1 ? max(x, 2 * 5, 3) : -x` in postfix order
    let mut bc = Bytecode::new();
    bc.add_var(x)?;
    bc.add_val(1.0)?;
    bc.add_op(CompareOp::Gt.into())?;
    bc.add_if_else(Branch::If)?;
    bc.add_var(x)?;
    bc.add_val(2.0)?;
    bc.add_val(5.0)?;
    bc.add_op(BinaryOp::Mul.into())?;
    bc.add_val(3.0)?;
    bc.add_fun(max, Arity::Variadic(3))?;
    bc.add_if_else(Branch::Else)?;
    bc.add_var(x)?;
    bc.add_op(UnaryOp::Neg.into())?;
    bc.add_if_else(Branch::EndIf)?;
    bc.add_assign_op(y)?;
    bc.finalize()?;

    // 3. Inspect the program
    print!("{}", bc.dump());
    println!("stack slots: {}", bc.max_stack_size());

    // 4. Evaluate it for a few inputs
    let mut ev = Evaluator::new();
    for value in [2.0, 0.5, 12.0] {
        symbols.set_var(x, value)?;
        let result = ev.eval(&bc, &mut symbols)?;
        println!("x = {value}: result = {result}, y = {:?}", symbols.var(y));
    }
    Ok(())
}
