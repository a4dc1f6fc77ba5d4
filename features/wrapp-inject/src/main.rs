use std::{error::Error, sync::Arc};

use tracing_subscriber::{prelude::*, EnvFilter};
use wrapp_inject::{Collection, InjectConfig, Next, Outcome, Provider};

#[derive(Clone, Default, Debug)]
struct DatabaseUrl(String);

#[derive(Clone, Debug)]
struct Pool {
    url: Arc<str>,
}

#[derive(Clone, Default, Debug)]
struct Request {
    user: String,
}

#[derive(Clone, Default, Debug)]
struct Response {
    body: String,
}

fn init_tracing() -> Result<(), Box<dyn Error>> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into())
        .add_directive("wrapp_inject=debug".parse()?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;

    let app = Collection::new("demo")
        .add_constant(DatabaseUrl("postgres://localhost/demo".into()))
        .add(
            Provider::func("connect", |url: DatabaseUrl| {
                tracing::info!("Connecting to {}", url.0);
                (Pool {
                    url: Arc::from(url.0),
                },)
            })
            .cacheable(),
        )
        .add(Provider::wrapper(
            "errors",
            |next: Next<(), (Response, Outcome)>| {
                let (response, outcome) = next.call(());
                match outcome.into_result() {
                    Ok(()) => (response,),
                    Err(error) => (Response {
                        body: format!("error: {error}"),
                    },),
                }
            },
        ))
        .add(Provider::fallible("authorize", |request: Request| {
            if request.user.is_empty() {
                return Err("anonymous requests are not allowed");
            }
            Ok((request.user,))
        }))
        .add(Provider::func("handle", |user: String, pool: Pool| {
            (Response {
                body: format!("hello {user}, served from {}", pool.url),
            },)
        }));

    let invoker = app
        .binder()
        .config(InjectConfig::default())
        .invoke::<(Request,), (Response,)>()
        .bind()?;
    tracing::info!("Bound chain: {:?}", invoker.summary().included);

    for user in ["alice", ""] {
        let (response,) = invoker.try_invoke((Request { user: user.into() },))?;
        println!("{}", response.body);
    }
    Ok(())
}
