use fabriq_transport::Identity;

use crate::cmd::KeygenArgs;
use crate::exit::{identity_error, CliError, CliResult, FAILURE, SUCCESS};

pub fn run(args: KeygenArgs) -> CliResult<i32> {
    if args.out.exists() && !args.force {
        return Err(CliError::new(
            FAILURE,
            format!(
                "{} already exists (use --force to overwrite)",
                args.out.display()
            ),
        ));
    }

    let identity = Identity::generate().map_err(|err| identity_error("keygen failed", err))?;
    identity
        .save(&args.out)
        .map_err(|err| identity_error("keygen failed", err))?;

    println!("{}", identity.public_key_hex());
    Ok(SUCCESS)
}
