//! Interactive terminal client: a background task prints every server line
//! verbatim while a menu loop turns user input into wire commands.

use anyhow::{Context, Result};
use tokio::io::{self, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{info, warn};

use crate::cli::ClientArgs;
use crate::wire;

type StdinReader = BufReader<tokio::io::Stdin>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let render_task = tokio::spawn(render_server_lines(reader));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let result = run_menu(&mut stdin, &mut writer).await;

    shutdown_connection(&mut writer).await;
    render_task.abort();
    result
}

async fn run_menu(stdin: &mut StdinReader, writer: &mut OwnedWriteHalf) -> Result<()> {
    loop {
        print_menu().await?;
        let Some(choice) = wire::read_line(stdin).await? else {
            return Ok(());
        };
        match choice.trim() {
            "1" => public_chat(stdin, writer).await?,
            "2" => private_chat(stdin, writer).await?,
            "3" => update_name(stdin, writer).await?,
            "0" => return Ok(()),
            _ => write_stdout(">>>> 请输入合法范围内的数字 <<<<").await?,
        }
    }
}

async fn print_menu() -> io::Result<()> {
    write_stdout("1.公聊模式").await?;
    write_stdout("2.私聊模式").await?;
    write_stdout("3.更新用户名").await?;
    write_stdout("0.退出").await
}

/// Every non-empty line goes out as a broadcast until the user types `exit`.
async fn public_chat(stdin: &mut StdinReader, writer: &mut OwnedWriteHalf) -> Result<()> {
    loop {
        write_stdout(">>>> 请输入聊天内容，exit 返回主菜单").await?;
        let Some(text) = wire::read_line(stdin).await? else {
            return Ok(());
        };
        let text = text.trim();
        if text == "exit" {
            return Ok(());
        }
        if text.is_empty() {
            continue;
        }
        wire::write_line(writer, text)
            .await
            .context("failed to send broadcast")?;
    }
}

/// Lists who is online, then sends `to|<target>|<message>` lines for the
/// chosen partner until the user backs out.
async fn private_chat(stdin: &mut StdinReader, writer: &mut OwnedWriteHalf) -> Result<()> {
    wire::write_line(writer, "who")
        .await
        .context("failed to query online users")?;
    loop {
        write_stdout(">>>> 请输入聊天对象[用户名]，exit 返回主菜单").await?;
        let Some(target) = wire::read_line(stdin).await? else {
            return Ok(());
        };
        let target = target.trim().to_string();
        if target == "exit" {
            return Ok(());
        }
        if target.is_empty() {
            continue;
        }
        loop {
            write_stdout(">>>> 请输入消息内容，exit 返回上一级").await?;
            let Some(text) = wire::read_line(stdin).await? else {
                return Ok(());
            };
            let text = text.trim();
            if text == "exit" {
                break;
            }
            if text.is_empty() {
                continue;
            }
            wire::write_line(writer, &format!("to|{target}|{text}"))
                .await
                .context("failed to send direct message")?;
        }
    }
}

async fn update_name(stdin: &mut StdinReader, writer: &mut OwnedWriteHalf) -> Result<()> {
    write_stdout(">>>> 请输入用户名").await?;
    let Some(name) = wire::read_line(stdin).await? else {
        return Ok(());
    };
    let name = name.trim();
    if name.is_empty() {
        return Ok(());
    }
    wire::write_line(writer, &format!("rename|{name}"))
        .await
        .context("failed to send rename")
}

async fn render_server_lines(reader: OwnedReadHalf) {
    let mut reader = BufReader::new(reader);
    loop {
        match wire::read_line(&mut reader).await {
            Ok(Some(line)) => {
                if write_stdout(&line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = write_stdout("*** 服务器已断开连接").await;
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to read from server");
                break;
            }
        }
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
