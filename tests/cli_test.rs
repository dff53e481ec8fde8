use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_import_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.arg("import-cylinders")
        .arg("tests/fixtures/cylinders.csv")
        .arg("--vendor")
        .arg("7");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "id,serial_number,status,vendor_id,is_assigned,current_order_id",
        ))
        .stdout(predicate::str::contains("1,OX-1001,filled,7,false,"))
        .stdout(predicate::str::contains("2,OX-1002,empty,7,false,"))
        // Missing status defaults to filled.
        .stdout(predicate::str::contains("3,OX-1003,filled,7,false,"));

    Ok(())
}

#[test]
fn test_cli_register_account_prints_json() {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.args([
        "register-account",
        "Oxy Supplies",
        "--role",
        "vendor",
        "--latitude",
        "6.5",
        "--longitude",
        "3.4",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"role\": \"vendor\""))
        .stdout(predicate::str::contains("\"name\": \"Oxy Supplies\""));
}

#[test]
fn test_cli_create_order_starts_pending() {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.args([
        "create-order",
        "--hospital",
        "1",
        "--quantity",
        "3",
        "--urgency",
        "high",
        "--total-amount",
        "1250.00",
        "--latitude",
        "6.52",
        "--longitude",
        "3.37",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"pending\""))
        .stdout(predicate::str::contains("\"urgency\": \"high\""))
        .stdout(predicate::str::contains("\"total_amount\": \"1250.00\""));
}

#[test]
fn test_cli_rejects_non_positive_amount() {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.args([
        "create-order",
        "--hospital",
        "1",
        "--quantity",
        "1",
        "--total-amount",
        "0",
    ]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Amount must be positive"));
}

#[test]
fn test_cli_reports_missing_order() {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.args(["delivery-status", "99"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Order 99 not found"));
}

#[test]
fn test_cli_rejects_unknown_status() {
    let mut cmd = Command::new(cargo_bin!("gasflow"));
    cmd.args(["list-cylinders", "--status", "broken"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown cylinder status"));
}
